use chrono::{DateTime, Utc};

/// Immutable per-run filter settings, built once from config.
#[derive(Debug, Clone)]
pub struct FilterCriteria {
    pub keywords: Vec<String>,
    pub date_start: DateTime<Utc>,
    pub date_end: DateTime<Utc>,
    pub min_subscribers: u64,
    pub max_subscribers: u64,
}

/// A channel candidate with everything the filter looks at.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub title: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub subscriber_count: u64,
}

/// Full predicate: keyword, date range, and subscriber bounds, all inclusive.
/// Pure and deterministic.
pub fn passes(candidate: &Candidate, criteria: &FilterCriteria) -> bool {
    matches_keywords(&candidate.title, &candidate.description, criteria)
        && within_date_range(candidate.published_at, criteria)
        && within_subscriber_bounds(candidate.subscriber_count, criteria)
}

/// Case-insensitive substring match against title or description.
/// An empty keyword list matches everything.
pub fn matches_keywords(title: &str, description: &str, criteria: &FilterCriteria) -> bool {
    if criteria.keywords.is_empty() {
        return true;
    }
    let title = title.to_lowercase();
    let description = description.to_lowercase();
    criteria
        .keywords
        .iter()
        .any(|k| {
            let k = k.to_lowercase();
            title.contains(&k) || description.contains(&k)
        })
}

pub fn within_date_range(published_at: DateTime<Utc>, criteria: &FilterCriteria) -> bool {
    published_at >= criteria.date_start && published_at <= criteria.date_end
}

pub fn within_subscriber_bounds(count: u64, criteria: &FilterCriteria) -> bool {
    count >= criteria.min_subscribers && count <= criteria.max_subscribers
}

// ── Tests ──
