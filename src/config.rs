use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Deserialize;

use crate::api::BackoffPolicy;
use crate::filter::FilterCriteria;

/// Immutable run configuration, loaded once from a TOML file and handed to
/// each component at construction. `YOUTUBE_API_KEY` in the environment
/// overrides the file value so the key never has to live on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_output_csv")]
    pub output_csv: PathBuf,

    /// Search keywords; a candidate passes if any keyword matches.
    pub keywords: Vec<String>,
    /// How far back the publishedAfter window reaches.
    #[serde(default = "default_days_back")]
    pub days_back: i64,
    #[serde(default)]
    pub region_code: Option<String>,

    #[serde(default)]
    pub min_subscribers: u64,
    #[serde(default = "default_max_subscribers")]
    pub max_subscribers: u64,

    /// Quota reset window. On quotaExceeded the run stops and reports
    /// now + this wait as the earliest sensible re-invocation time.
    #[serde(default = "default_quota_wait_hours")]
    pub quota_wait_hours: u64,
    #[serde(default = "default_quota_max_attempts")]
    pub quota_max_attempts: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/harvest.sqlite")
}

fn default_output_csv() -> PathBuf {
    PathBuf::from("data/channels.csv")
}

fn default_days_back() -> i64 {
    365
}

fn default_max_subscribers() -> u64 {
    50_000
}

fn default_quota_wait_hours() -> u64 {
    24
}

fn default_quota_max_attempts() -> u32 {
    1
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        if let Ok(key) = std::env::var("YOUTUBE_API_KEY") {
            if !key.is_empty() {
                config.api_key = key;
            }
        }
        Ok(config)
    }

    pub fn require_api_key(&self) -> Result<&str> {
        if self.api_key.is_empty() {
            bail!("no API key: set api_key in the config file or YOUTUBE_API_KEY in the environment");
        }
        Ok(&self.api_key)
    }

    pub fn criteria(&self) -> FilterCriteria {
        let date_end = Utc::now();
        FilterCriteria {
            keywords: self.keywords.clone(),
            date_start: date_end - chrono::Duration::days(self.days_back),
            date_end,
            min_subscribers: self.min_subscribers,
            max_subscribers: self.max_subscribers,
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            wait: Duration::from_secs(self.quota_wait_hours * 3600),
            max_attempts: self.quota_max_attempts,
        }
    }
}
