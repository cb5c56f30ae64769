use regex::Regex;
use tracing::debug;

use crate::error::ScrapeError;

const EMAIL_PATTERN: &str = r"[A-Za-z0-9_.+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}";
const HANDLE_PATTERN: &str = r#""canonicalBaseUrl":"/(@[A-Za-z0-9._\-]+)""#;
const CANONICAL_HANDLE_PATTERN: &str =
    r#"<link rel="canonical" href="https://www\.youtube\.com/(@[A-Za-z0-9._\-]+)""#;
const COUNTRY_PATTERN: &str = r#""country":\{"simpleText":"([^"]+)"\}"#;
const LOCATION_ROW_PATTERN: &str = r"(?i)(?:Location|Lives in)[:\s]+([^\n<\x22]+)";

/// Attributes only available from the public channel page, not the API.
/// Every field is optional: absence is a valid empty result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelExtras {
    pub handle: Option<String>,
    pub email: Option<String>,
    pub location: Option<String>,
}

/// Slower page-rendering lookup for one channel.
#[allow(async_fn_in_trait)]
pub trait Enricher {
    async fn enrich(&self, channel_id: &str) -> Result<ChannelExtras, ScrapeError>;
}

/// Enricher backed by a plain HTTP fetch of the channel's about page.
/// The fields we need are embedded in the initial HTML payload.
pub struct PageEnricher {
    http: reqwest::Client,
}

impl PageEnricher {
    pub fn new() -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) yt_harvester/0.1")
            .build()?;
        Ok(Self { http })
    }

    async fn fetch_about(&self, channel_id: &str) -> Result<String, ScrapeError> {
        // hl/gl pin the page to English so the Location label is stable.
        let url = format!(
            "https://www.youtube.com/channel/{}/about?hl=en&gl=US",
            channel_id
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ScrapeError::Fetch {
                channel_id: channel_id.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ScrapeError::Fetch {
                channel_id: channel_id.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        response.text().await.map_err(|e| ScrapeError::Fetch {
            channel_id: channel_id.to_string(),
            reason: e.to_string(),
        })
    }
}

impl Enricher for PageEnricher {
    async fn enrich(&self, channel_id: &str) -> Result<ChannelExtras, ScrapeError> {
        let html = self.fetch_about(channel_id).await?;
        let extras = extract_extras(&html);
        if extras == ChannelExtras::default() && !html.contains("ytInitialData") {
            // Nothing extracted and the page doesn't look like a channel page
            // at all: structure changed or we were served an interstitial.
            return Err(ScrapeError::Structure {
                channel_id: channel_id.to_string(),
            });
        }
        debug!(
            "Enriched {}: handle={:?} email={:?} location={:?}",
            channel_id, extras.handle, extras.email, extras.location
        );
        Ok(extras)
    }
}

/// Pull handle, email, and location out of a channel page. Each extraction
/// fails independently; a missing field is simply left empty.
pub fn extract_extras(html: &str) -> ChannelExtras {
    ChannelExtras {
        handle: extract_handle(html),
        email: extract_email(html),
        location: extract_location(html),
    }
}

fn extract_handle(html: &str) -> Option<String> {
    let canonical = Regex::new(CANONICAL_HANDLE_PATTERN).unwrap();
    if let Some(caps) = canonical.captures(html) {
        return Some(caps[1].to_string());
    }
    let embedded = Regex::new(HANDLE_PATTERN).unwrap();
    embedded.captures(html).map(|caps| caps[1].to_string())
}

pub fn extract_email(text: &str) -> Option<String> {
    let re = Regex::new(EMAIL_PATTERN).unwrap();
    re.find(text).map(|m| m.as_str().to_string())
}

fn extract_location(html: &str) -> Option<String> {
    let country = Regex::new(COUNTRY_PATTERN).unwrap();
    if let Some(caps) = country.captures(html) {
        return Some(caps[1].to_string());
    }
    let row = Regex::new(LOCATION_ROW_PATTERN).unwrap();
    row.captures(html)
        .map(|caps| caps[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

// ── Tests ──
