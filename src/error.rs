use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failures from the YouTube Data API layer.
///
/// Only `QuotaExceeded` stops a run; it carries the timestamp after which the
/// operator should re-invoke. Everything else is surfaced immediately and,
/// at the per-record level, isolated by the pipeline.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("API quota exhausted, retry after {retry_after}")]
    QuotaExceeded { retry_after: DateTime<Utc> },
    #[error("network failure: {0}")]
    Network(String),
    #[error("malformed API response: {0}")]
    Malformed(String),
}

/// Failures from the page-scraping enrichment layer.
///
/// These never abort a batch: the record is written with empty extras.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("failed to fetch page for {channel_id}: {reason}")]
    Fetch { channel_id: String, reason: String },
    #[error("unrecognized page structure for {channel_id}")]
    Structure { channel_id: String },
}
