use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::FetchError;

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const PAGE_SIZE: u32 = 50;
const STATS_CHUNK: usize = 50;

/// Reaction to a quotaExceeded signal, injected into the client.
///
/// The default matches the daily quota reset: report now + 24h to the
/// operator and do not auto-loop (`max_attempts` = 1 means no in-process
/// retry; higher values sleep `wait` between attempts).
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub wait: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(24 * 3600),
            max_attempts: 1,
        }
    }
}

impl BackoffPolicy {
    pub fn retry_after(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::from_std(self.wait).unwrap_or(chrono::Duration::hours(24))
    }
}

/// One search.list hit that parsed cleanly.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub video_id: String,
    pub channel_id: String,
    pub title: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    pub next_page_token: Option<String>,
}

/// channels.list snippet + statistics for one channel.
#[derive(Debug, Clone)]
pub struct ChannelStats {
    pub channel_id: String,
    pub title: String,
    pub subscriber_count: u64,
    pub video_count: u64,
    pub view_count: u64,
    pub uploads_playlist: Option<String>,
    pub country: Option<String>,
}

/// Remote source of candidates and channel statistics.
#[allow(async_fn_in_trait)]
pub trait Fetcher {
    async fn search(
        &self,
        query: &str,
        published_after: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> Result<SearchPage, FetchError>;

    async fn channel_stats(&self, channel_id: &str) -> Result<Option<ChannelStats>, FetchError>;

    /// All video ids in an uploads playlist, across pages.
    async fn uploads(&self, playlist_id: &str) -> Result<Vec<String>, FetchError>;

    /// Summed (likes, comments) over the given videos.
    async fn video_totals(&self, video_ids: &[String]) -> Result<(u64, u64), FetchError>;
}

/// YouTube Data API v3 client with quota-aware error mapping.
pub struct YoutubeClient {
    http: reqwest::Client,
    api_key: String,
    backoff: BackoffPolicy,
    region_code: Option<String>,
}

impl YoutubeClient {
    pub fn new(api_key: &str, backoff: BackoffPolicy, region_code: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
            backoff,
            region_code,
        }
    }

    async fn get_json(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Value, FetchError> {
        let url = format!("{}/{}", API_BASE, endpoint);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = self
                .http
                .get(&url)
                .query(params)
                .query(&[("key", self.api_key.as_str())])
                .send()
                .await
                .map_err(|e| FetchError::Network(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                return response
                    .json()
                    .await
                    .map_err(|e| FetchError::Malformed(e.to_string()));
            }

            let body = response.text().await.unwrap_or_default();
            if !is_quota_signal(status.as_u16(), &body) {
                return Err(FetchError::Network(format!(
                    "HTTP {} from {}: {}",
                    status,
                    endpoint,
                    body.chars().take(200).collect::<String>()
                )));
            }

            if attempt >= self.backoff.max_attempts.max(1) {
                return Err(FetchError::QuotaExceeded {
                    retry_after: self.backoff.retry_after(),
                });
            }
            warn!(
                "Quota exceeded on {} (attempt {}/{}), backing off {:.0}s",
                endpoint,
                attempt,
                self.backoff.max_attempts,
                self.backoff.wait.as_secs_f64()
            );
            tokio::time::sleep(self.backoff.wait).await;
        }
    }
}

impl Fetcher for YoutubeClient {
    async fn search(
        &self,
        query: &str,
        published_after: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> Result<SearchPage, FetchError> {
        let max_results = PAGE_SIZE.to_string();
        let published = published_after.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let mut params = vec![
            ("part", "snippet"),
            ("type", "video"),
            ("order", "date"),
            ("maxResults", max_results.as_str()),
            ("publishedAfter", published.as_str()),
            ("q", query),
        ];
        if let Some(region) = self.region_code.as_deref() {
            params.push(("regionCode", region));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let json = self.get_json("search", &params).await?;
        Ok(parse_search_page(&json))
    }

    async fn channel_stats(&self, channel_id: &str) -> Result<Option<ChannelStats>, FetchError> {
        let json = self
            .get_json(
                "channels",
                &[
                    ("part", "snippet,statistics,contentDetails"),
                    ("id", channel_id),
                ],
            )
            .await?;
        Ok(parse_channel_stats(&json, channel_id))
    }

    async fn uploads(&self, playlist_id: &str) -> Result<Vec<String>, FetchError> {
        let mut video_ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let max_results = PAGE_SIZE.to_string();
            let mut params = vec![
                ("part", "contentDetails"),
                ("playlistId", playlist_id),
                ("maxResults", max_results.as_str()),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }

            let json = self.get_json("playlistItems", &params).await?;
            if let Some(items) = json["items"].as_array() {
                for item in items {
                    if let Some(id) = item["contentDetails"]["videoId"].as_str() {
                        video_ids.push(id.to_string());
                    }
                }
            }

            page_token = json["nextPageToken"].as_str().map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }

        debug!("Playlist {} has {} uploads", playlist_id, video_ids.len());
        Ok(video_ids)
    }

    async fn video_totals(&self, video_ids: &[String]) -> Result<(u64, u64), FetchError> {
        let mut likes = 0u64;
        let mut comments = 0u64;

        for chunk in video_ids.chunks(STATS_CHUNK) {
            let ids = chunk.join(",");
            let json = self
                .get_json("videos", &[("part", "statistics"), ("id", ids.as_str())])
                .await?;
            if let Some(items) = json["items"].as_array() {
                for item in items {
                    let stats = &item["statistics"];
                    likes += count_field(stats, "likeCount");
                    comments += count_field(stats, "commentCount");
                }
            }
        }

        Ok((likes, comments))
    }
}

/// A 403/429 whose error body names quota or rate-limit exhaustion.
pub fn is_quota_signal(status: u16, body: &str) -> bool {
    (status == 403 || status == 429)
        && (body.contains("quotaExceeded") || body.contains("rateLimitExceeded"))
}

pub fn parse_search_page(json: &Value) -> SearchPage {
    let hits = json["items"]
        .as_array()
        .map(|items| items.iter().filter_map(parse_search_hit).collect())
        .unwrap_or_default();
    SearchPage {
        hits,
        next_page_token: json["nextPageToken"].as_str().map(str::to_string),
    }
}

// Items missing any required field are malformed input: skipped, not fatal.
fn parse_search_hit(item: &Value) -> Option<SearchHit> {
    let video_id = item["id"]["videoId"].as_str()?;
    let snippet = &item["snippet"];
    let channel_id = snippet["channelId"].as_str()?;
    let published_at = snippet["publishedAt"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())?
        .with_timezone(&Utc);

    Some(SearchHit {
        video_id: video_id.to_string(),
        channel_id: channel_id.to_string(),
        title: snippet["title"].as_str().unwrap_or_default().to_string(),
        description: snippet["description"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        published_at,
    })
}

fn parse_channel_stats(json: &Value, channel_id: &str) -> Option<ChannelStats> {
    let item = json["items"].as_array()?.first()?;
    let snippet = &item["snippet"];
    let stats = &item["statistics"];

    Some(ChannelStats {
        channel_id: channel_id.to_string(),
        title: snippet["title"].as_str().unwrap_or_default().to_string(),
        subscriber_count: count_field(stats, "subscriberCount"),
        video_count: count_field(stats, "videoCount"),
        view_count: count_field(stats, "viewCount"),
        uploads_playlist: item["contentDetails"]["relatedPlaylists"]["uploads"]
            .as_str()
            .map(str::to_string),
        country: snippet["country"].as_str().map(str::to_string),
    })
}

// The API returns counts as JSON strings; hidden counts come back absent.
fn count_field(stats: &Value, key: &str) -> u64 {
    stats[key]
        .as_str()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0)
}

// ── Tests ──
