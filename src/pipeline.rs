use anyhow::Result;
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::api::{Fetcher, SearchHit};
use crate::db::{self, ChannelRecord};
use crate::enrich::{ChannelExtras, Enricher};
use crate::error::FetchError;
use crate::filter::{self, FilterCriteria};
use crate::store::{IdKind, IdStore};
use crate::writer::CsvWriter;

/// Counters for one run, printed at the end.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub scanned: usize,
    pub filtered_out: usize,
    pub skipped: usize,
    pub enriched: usize,
    pub written: usize,
    pub record_errors: usize,
    /// Set when the API quota ran out; the run stopped early and should be
    /// re-invoked after this timestamp.
    pub quota_exhausted: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn print(&self) {
        println!(
            "Scanned {} videos: {} written ({} enriched), {} filtered out, {} skipped, {} record errors.",
            self.scanned, self.written, self.enriched, self.filtered_out, self.skipped,
            self.record_errors,
        );
        if let Some(retry_after) = self.quota_exhausted {
            println!(
                "API quota exhausted. Progress is saved; re-run after {}.",
                retry_after.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            );
        }
    }
}

enum Outcome {
    Written { enriched: bool },
    Filtered,
    Skipped,
    RecordError,
    Quota(DateTime<Utc>),
}

/// Drive the full pipeline over every query: fetch candidates page by page,
/// filter, dedup against the id store, enrich survivors, and append each
/// finished record before the next candidate starts.
///
/// Per-record failures are isolated; quota exhaustion and writer I/O errors
/// end the run (writer errors as `Err`, quota as a clean early stop).
#[allow(clippy::too_many_arguments)]
pub async fn run<F, E, S>(
    conn: &Connection,
    fetcher: &F,
    enricher: &E,
    store: &mut S,
    writer: &mut CsvWriter,
    criteria: &FilterCriteria,
    queries: &[String],
    limit: Option<usize>,
) -> Result<RunSummary>
where
    F: Fetcher,
    E: Enricher,
    S: IdStore,
{
    let mut summary = RunSummary::default();

    'queries: for query in queries {
        info!("Searching for '{}'", query);
        let mut page_token: Option<String> = None;
        let mut page_index = 0usize;

        loop {
            page_index += 1;
            let page = match fetcher
                .search(query, criteria.date_start, page_token.as_deref())
                .await
            {
                Ok(page) => page,
                Err(FetchError::QuotaExceeded { retry_after }) => {
                    summary.quota_exhausted = Some(retry_after);
                    break 'queries;
                }
                // Unrecoverable fetch error: surface immediately, no retry.
                Err(e) => return Err(e.into()),
            };
            info!("[{}] page #{}: {} hits", query, page_index, page.hits.len());

            for hit in &page.hits {
                summary.scanned += 1;
                match handle_hit(conn, fetcher, enricher, store, writer, criteria, hit).await? {
                    Outcome::Written { enriched } => {
                        summary.written += 1;
                        if enriched {
                            summary.enriched += 1;
                        }
                        if limit.is_some_and(|n| summary.written >= n) {
                            info!("Reached limit of {} written channels", summary.written);
                            break 'queries;
                        }
                    }
                    Outcome::Filtered => summary.filtered_out += 1,
                    Outcome::Skipped => summary.skipped += 1,
                    Outcome::RecordError => summary.record_errors += 1,
                    Outcome::Quota(retry_after) => {
                        summary.quota_exhausted = Some(retry_after);
                        break 'queries;
                    }
                }
            }

            page_token = page.next_page_token;
            if page_token.is_none() || page.hits.is_empty() {
                break;
            }
        }
    }

    Ok(summary)
}

/// One candidate through the whole chain. Errors returned here abort the run
/// (writer/store I/O); everything recoverable becomes an `Outcome`.
async fn handle_hit<F, E, S>(
    conn: &Connection,
    fetcher: &F,
    enricher: &E,
    store: &mut S,
    writer: &mut CsvWriter,
    criteria: &FilterCriteria,
    hit: &SearchHit,
) -> Result<Outcome>
where
    F: Fetcher,
    E: Enricher,
    S: IdStore,
{
    if store.seen(&hit.video_id)? {
        return Ok(Outcome::Skipped);
    }
    if !filter::matches_keywords(&hit.title, &hit.description, criteria)
        || !filter::within_date_range(hit.published_at, criteria)
    {
        store.mark(&hit.video_id, IdKind::Video)?;
        return Ok(Outcome::Filtered);
    }
    if store.seen(&hit.channel_id)? {
        store.mark(&hit.video_id, IdKind::Video)?;
        return Ok(Outcome::Skipped);
    }

    let stats = match fetcher.channel_stats(&hit.channel_id).await {
        Ok(Some(stats)) => stats,
        Ok(None) => {
            warn!(
                "Channel {} missing from API response (video {})",
                hit.channel_id, hit.video_id
            );
            store.mark(&hit.video_id, IdKind::Video)?;
            return Ok(Outcome::RecordError);
        }
        Err(FetchError::QuotaExceeded { retry_after }) => return Ok(Outcome::Quota(retry_after)),
        Err(e) => {
            warn!(
                "Stats fetch failed for channel {} (video {}): {}",
                hit.channel_id, hit.video_id, e
            );
            store.mark(&hit.video_id, IdKind::Video)?;
            return Ok(Outcome::RecordError);
        }
    };

    // Full predicate now that the subscriber count is known.
    let candidate = filter::Candidate {
        title: hit.title.clone(),
        description: hit.description.clone(),
        published_at: hit.published_at,
        subscriber_count: stats.subscriber_count,
    };
    if !filter::passes(&candidate, criteria) {
        store.mark(&hit.video_id, IdKind::Video)?;
        store.mark(&hit.channel_id, IdKind::Channel)?;
        return Ok(Outcome::Filtered);
    }

    // Like/comment totals over the uploads playlist. Quota stops the run
    // before anything is marked, so the channel is retried next invocation;
    // other failures degrade to zero totals.
    let (like_count, comment_count) = match stats.uploads_playlist.as_deref() {
        Some(playlist_id) => match totals_for_playlist(fetcher, playlist_id).await {
            Ok(totals) => totals,
            Err(FetchError::QuotaExceeded { retry_after }) => {
                return Ok(Outcome::Quota(retry_after))
            }
            Err(e) => {
                warn!("Upload totals failed for {}: {}", hit.channel_id, e);
                (0, 0)
            }
        },
        None => (0, 0),
    };

    // Marked before the expensive page scrape: at-most-once enrichment per
    // channel across interrupted runs.
    store.mark(&hit.channel_id, IdKind::Channel)?;
    store.mark(&hit.video_id, IdKind::Video)?;

    let (extras, enriched) = match enricher.enrich(&hit.channel_id).await {
        Ok(extras) => (extras, true),
        Err(e) => {
            warn!("Enrichment failed for {}: {}", hit.channel_id, e);
            (ChannelExtras::default(), false)
        }
    };

    let record = ChannelRecord {
        channel_id: stats.channel_id,
        handle: extras.handle,
        title: stats.title,
        subscriber_count: stats.subscriber_count,
        video_count: stats.video_count,
        view_count: stats.view_count,
        like_count,
        comment_count,
        email: extras.email,
        location: extras.location.or(stats.country),
    };
    writer.append(&record)?;
    db::upsert_channel(conn, &record, enriched)?;

    Ok(Outcome::Written { enriched })
}

async fn totals_for_playlist<F: Fetcher>(
    fetcher: &F,
    playlist_id: &str,
) -> Result<(u64, u64), FetchError> {
    let video_ids = fetcher.uploads(playlist_id).await?;
    fetcher.video_totals(&video_ids).await
}

pub struct EnrichCounts {
    pub total: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Re-run enrichment for channels whose first scrape failed.
pub async fn enrich_pending<E: Enricher>(
    conn: &Connection,
    enricher: &E,
    limit: Option<usize>,
) -> Result<EnrichCounts> {
    let pending = db::fetch_unenriched(conn, limit)?;
    let pb = ProgressBar::new(pending.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut updated = 0usize;
    let mut failed = 0usize;
    for record in &pending {
        match enricher.enrich(&record.channel_id).await {
            Ok(extras) => {
                db::update_extras(
                    conn,
                    &record.channel_id,
                    extras.handle.as_deref(),
                    extras.email.as_deref(),
                    extras.location.as_deref(),
                )?;
                updated += 1;
            }
            Err(e) => {
                warn!("Enrichment failed for {}: {}", record.channel_id, e);
                failed += 1;
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    Ok(EnrichCounts {
        total: pending.len(),
        updated,
        failed,
    })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::{HashMap, VecDeque};

    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;
    use crate::api::{ChannelStats, SearchPage};
    use crate::error::ScrapeError;
    use crate::store::MemoryIdStore;
    use crate::writer;

    struct MockFetcher {
        pages: RefCell<VecDeque<SearchPage>>,
        stats: HashMap<String, ChannelStats>,
        quota_when_empty: bool,
        quota_on_stats: bool,
        stats_calls: Cell<usize>,
    }

    impl MockFetcher {
        fn new(pages: Vec<SearchPage>) -> Self {
            Self {
                pages: RefCell::new(pages.into()),
                stats: HashMap::new(),
                quota_when_empty: false,
                quota_on_stats: false,
                stats_calls: Cell::new(0),
            }
        }

        fn with_stats(mut self, stats: ChannelStats) -> Self {
            self.stats.insert(stats.channel_id.clone(), stats);
            self
        }
    }

    impl Fetcher for MockFetcher {
        async fn search(
            &self,
            _query: &str,
            _published_after: DateTime<Utc>,
            _page_token: Option<&str>,
        ) -> Result<SearchPage, FetchError> {
            match self.pages.borrow_mut().pop_front() {
                Some(page) => Ok(page),
                None if self.quota_when_empty => Err(FetchError::QuotaExceeded {
                    retry_after: Utc::now() + chrono::Duration::hours(24),
                }),
                None => Ok(SearchPage {
                    hits: Vec::new(),
                    next_page_token: None,
                }),
            }
        }

        async fn channel_stats(
            &self,
            channel_id: &str,
        ) -> Result<Option<ChannelStats>, FetchError> {
            self.stats_calls.set(self.stats_calls.get() + 1);
            if self.quota_on_stats {
                return Err(FetchError::QuotaExceeded {
                    retry_after: Utc::now() + chrono::Duration::hours(24),
                });
            }
            Ok(self.stats.get(channel_id).cloned())
        }

        async fn uploads(&self, _playlist_id: &str) -> Result<Vec<String>, FetchError> {
            Ok(vec!["up1".into(), "up2".into()])
        }

        async fn video_totals(&self, _video_ids: &[String]) -> Result<(u64, u64), FetchError> {
            Ok((40_000, 3_000))
        }
    }

    struct MockEnricher {
        extras: Result<ChannelExtras, ()>,
        calls: Cell<usize>,
    }

    impl MockEnricher {
        fn returning(extras: ChannelExtras) -> Self {
            Self {
                extras: Ok(extras),
                calls: Cell::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                extras: Err(()),
                calls: Cell::new(0),
            }
        }
    }

    impl Enricher for MockEnricher {
        async fn enrich(&self, channel_id: &str) -> Result<ChannelExtras, ScrapeError> {
            self.calls.set(self.calls.get() + 1);
            match &self.extras {
                Ok(extras) => Ok(extras.clone()),
                Err(()) => Err(ScrapeError::Structure {
                    channel_id: channel_id.to_string(),
                }),
            }
        }
    }

    fn criteria() -> FilterCriteria {
        FilterCriteria {
            keywords: vec!["cooking".into()],
            date_start: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            date_end: Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap(),
            min_subscribers: 1000,
            max_subscribers: 10000,
        }
    }

    fn hit(video_id: &str, channel_id: &str) -> SearchHit {
        SearchHit {
            video_id: video_id.to_string(),
            channel_id: channel_id.to_string(),
            title: "Cooking with Lina".into(),
            description: "weeknight recipes".into(),
            published_at: Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap(),
        }
    }

    fn stats(channel_id: &str, subscribers: u64) -> ChannelStats {
        ChannelStats {
            channel_id: channel_id.to_string(),
            title: "Chef Lina".into(),
            subscriber_count: subscribers,
            video_count: 120,
            view_count: 900_000,
            uploads_playlist: Some("UUaaa".into()),
            country: Some("France".into()),
        }
    }

    fn page(hits: Vec<SearchHit>, next: Option<&str>) -> SearchPage {
        SearchPage {
            hits,
            next_page_token: next.map(str::to_string),
        }
    }

    struct TestRig {
        _dir: TempDir,
        csv_path: std::path::PathBuf,
        conn: Connection,
    }

    fn rig() -> TestRig {
        let dir = TempDir::new().unwrap();
        let csv_path = dir.path().join("out.csv");
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        TestRig {
            _dir: dir,
            csv_path,
            conn,
        }
    }

    #[tokio::test]
    async fn passing_channel_is_enriched_and_written() {
        let rig = rig();
        let fetcher = MockFetcher::new(vec![page(vec![hit("vid1", "UCaaa")], None)])
            .with_stats(stats("UCaaa", 5000));
        let enricher = MockEnricher::returning(ChannelExtras {
            handle: Some("@cheflina".into()),
            email: Some("lina@example.com".into()),
            location: Some("Paris, France".into()),
        });
        let mut store = MemoryIdStore::new();
        let mut csv = CsvWriter::append_to(&rig.csv_path).unwrap();

        let summary = run(
            &rig.conn,
            &fetcher,
            &enricher,
            &mut store,
            &mut csv,
            &criteria(),
            &["cooking".into()],
            None,
        )
        .await
        .unwrap();

        assert_eq!(summary.written, 1);
        assert_eq!(summary.enriched, 1);
        assert!(summary.quota_exhausted.is_none());

        let rows = writer::load(&rig.csv_path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].channel_id, "UCaaa");
        assert_eq!(rows[0].email.as_deref(), Some("lina@example.com"));
        assert_eq!(rows[0].like_count, 40_000);
        assert!(store.seen("UCaaa").unwrap());
        assert!(store.seen("vid1").unwrap());
    }

    #[tokio::test]
    async fn seen_channel_is_not_reenriched_or_duplicated() {
        let rig = rig();
        let fetcher = MockFetcher::new(vec![page(vec![hit("vid2", "UCaaa")], None)])
            .with_stats(stats("UCaaa", 5000));
        let enricher = MockEnricher::returning(ChannelExtras::default());
        let mut store = MemoryIdStore::new();
        store.mark("UCaaa", IdKind::Channel).unwrap();
        let mut csv = CsvWriter::append_to(&rig.csv_path).unwrap();

        let summary = run(
            &rig.conn,
            &fetcher,
            &enricher,
            &mut store,
            &mut csv,
            &criteria(),
            &["cooking".into()],
            None,
        )
        .await
        .unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.written, 0);
        assert_eq!(enricher.calls.get(), 0);
        assert_eq!(fetcher.stats_calls.get(), 0);
        assert!(writer::load(&rig.csv_path).unwrap().is_empty());
    }

    #[tokio::test]
    async fn quota_stops_run_without_corrupting_output() {
        let rig = rig();
        let mut fetcher = MockFetcher::new(vec![page(vec![hit("vid1", "UCaaa")], Some("page2"))])
            .with_stats(stats("UCaaa", 5000));
        fetcher.quota_when_empty = true;
        let enricher = MockEnricher::returning(ChannelExtras::default());
        let mut store = MemoryIdStore::new();
        let mut csv = CsvWriter::append_to(&rig.csv_path).unwrap();

        let summary = run(
            &rig.conn,
            &fetcher,
            &enricher,
            &mut store,
            &mut csv,
            &criteria(),
            &["cooking".into()],
            None,
        )
        .await
        .unwrap();

        assert!(summary.quota_exhausted.is_some());
        assert_eq!(summary.written, 1);
        // The record written before the quota hit survives intact.
        let rows = writer::load(&rig.csv_path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].channel_id, "UCaaa");
    }

    #[tokio::test]
    async fn quota_during_stats_leaves_candidate_unmarked() {
        let rig = rig();
        let mut fetcher = MockFetcher::new(vec![page(vec![hit("vid1", "UCaaa")], None)]);
        fetcher.quota_on_stats = true;
        let enricher = MockEnricher::returning(ChannelExtras::default());
        let mut store = MemoryIdStore::new();
        let mut csv = CsvWriter::append_to(&rig.csv_path).unwrap();

        let summary = run(
            &rig.conn,
            &fetcher,
            &enricher,
            &mut store,
            &mut csv,
            &criteria(),
            &["cooking".into()],
            None,
        )
        .await
        .unwrap();

        assert!(summary.quota_exhausted.is_some());
        // Nothing marked: the candidate is picked up again on re-invocation.
        assert!(!store.seen("vid1").unwrap());
        assert!(!store.seen("UCaaa").unwrap());
    }

    #[tokio::test]
    async fn failed_enrichment_writes_partial_record() {
        let rig = rig();
        let mut channel = stats("UCbbb", 5000);
        channel.country = None;
        let fetcher =
            MockFetcher::new(vec![page(vec![hit("vid1", "UCbbb")], None)]).with_stats(channel);
        let enricher = MockEnricher::failing();
        let mut store = MemoryIdStore::new();
        let mut csv = CsvWriter::append_to(&rig.csv_path).unwrap();

        let summary = run(
            &rig.conn,
            &fetcher,
            &enricher,
            &mut store,
            &mut csv,
            &criteria(),
            &["cooking".into()],
            None,
        )
        .await
        .unwrap();

        assert_eq!(summary.written, 1);
        assert_eq!(summary.enriched, 0);
        let rows = writer::load(&rig.csv_path).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].email.is_none());
        assert!(rows[0].location.is_none());
        // The channel stays queued for the enrich command.
        assert_eq!(db::fetch_unenriched(&rig.conn, None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn out_of_range_subscribers_rejected_and_marked() {
        let rig = rig();
        let fetcher = MockFetcher::new(vec![page(vec![hit("vid1", "UCsmall")], None)])
            .with_stats(stats("UCsmall", 500));
        let enricher = MockEnricher::returning(ChannelExtras::default());
        let mut store = MemoryIdStore::new();
        let mut csv = CsvWriter::append_to(&rig.csv_path).unwrap();

        let summary = run(
            &rig.conn,
            &fetcher,
            &enricher,
            &mut store,
            &mut csv,
            &criteria(),
            &["cooking".into()],
            None,
        )
        .await
        .unwrap();

        assert_eq!(summary.filtered_out, 1);
        assert_eq!(summary.written, 0);
        assert_eq!(enricher.calls.get(), 0);
        assert!(store.seen("UCsmall").unwrap());
        assert!(writer::load(&rig.csv_path).unwrap().is_empty());
    }

    #[tokio::test]
    async fn enrich_pending_updates_rows() {
        let rig = rig();
        db::upsert_channel(
            &rig.conn,
            &ChannelRecord {
                channel_id: "UCaaa".into(),
                handle: None,
                title: "Chef Lina".into(),
                subscriber_count: 5000,
                video_count: 120,
                view_count: 900_000,
                like_count: 0,
                comment_count: 0,
                email: None,
                location: None,
            },
            false,
        )
        .unwrap();

        let enricher = MockEnricher::returning(ChannelExtras {
            handle: Some("@cheflina".into()),
            email: Some("lina@example.com".into()),
            location: None,
        });

        let counts = enrich_pending(&rig.conn, &enricher, None).await.unwrap();
        assert_eq!(counts.total, 1);
        assert_eq!(counts.updated, 1);
        assert_eq!(counts.failed, 0);

        let rows = db::fetch_channels(&rig.conn).unwrap();
        assert_eq!(rows[0].email.as_deref(), Some("lina@example.com"));
        assert!(db::fetch_unenriched(&rig.conn, None).unwrap().is_empty());
    }
}
