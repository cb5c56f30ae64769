use std::path::Path;

use anyhow::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::store::{IdKind, IdStore};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS processed_ids (
            id        TEXT PRIMARY KEY,
            kind      TEXT NOT NULL CHECK(kind IN ('video','channel')),
            marked_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS channels (
            channel_id       TEXT PRIMARY KEY,
            handle           TEXT,
            title            TEXT NOT NULL,
            subscriber_count INTEGER NOT NULL DEFAULT 0,
            video_count      INTEGER NOT NULL DEFAULT 0,
            view_count       INTEGER NOT NULL DEFAULT 0,
            like_count       INTEGER NOT NULL DEFAULT 0,
            comment_count    INTEGER NOT NULL DEFAULT 0,
            email            TEXT,
            location         TEXT,
            enriched         BOOLEAN NOT NULL DEFAULT 0,
            discovered_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_channels_enriched ON channels(enriched);
        ",
    )?;
    Ok(())
}

/// One output row. Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub channel_id: String,
    pub handle: Option<String>,
    pub title: String,
    pub subscriber_count: u64,
    pub video_count: u64,
    pub view_count: u64,
    pub like_count: u64,
    pub comment_count: u64,
    pub email: Option<String>,
    pub location: Option<String>,
}

// ── Id Store ──

/// SQLite-backed processed-id set. Each `mark` commits immediately, so the
/// set survives a crash at any point.
pub struct SqliteIdStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteIdStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl IdStore for SqliteIdStore<'_> {
    fn seen(&self, id: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM processed_ids WHERE id = ?1")?;
        Ok(stmt.exists(rusqlite::params![id])?)
    }

    fn mark(&mut self, id: &str, kind: IdKind) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO processed_ids (id, kind) VALUES (?1, ?2)",
            rusqlite::params![id, kind.as_str()],
        )?;
        Ok(())
    }
}

// ── Channels ──

pub fn upsert_channel(conn: &Connection, record: &ChannelRecord, enriched: bool) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO channels
         (channel_id, handle, title, subscriber_count, video_count, view_count,
          like_count, comment_count, email, location, enriched)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        rusqlite::params![
            record.channel_id,
            record.handle,
            record.title,
            record.subscriber_count,
            record.video_count,
            record.view_count,
            record.like_count,
            record.comment_count,
            record.email,
            record.location,
            enriched,
        ],
    )?;
    Ok(())
}

/// Apply a later enrichment pass to an existing row. Only fills fields the
/// scrape actually produced; an empty scrape still flips the enriched flag
/// so the channel is not retried forever.
pub fn update_extras(
    conn: &Connection,
    channel_id: &str,
    handle: Option<&str>,
    email: Option<&str>,
    location: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE channels SET
            handle   = COALESCE(?2, handle),
            email    = COALESCE(?3, email),
            location = COALESCE(?4, location),
            enriched = 1
         WHERE channel_id = ?1",
        rusqlite::params![channel_id, handle, email, location],
    )?;
    Ok(())
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ChannelRecord> {
    Ok(ChannelRecord {
        channel_id: row.get(0)?,
        handle: row.get(1)?,
        title: row.get(2)?,
        subscriber_count: row.get(3)?,
        video_count: row.get(4)?,
        view_count: row.get(5)?,
        like_count: row.get(6)?,
        comment_count: row.get(7)?,
        email: row.get(8)?,
        location: row.get(9)?,
    })
}

const RECORD_COLUMNS: &str = "channel_id, handle, title, subscriber_count, video_count, \
                              view_count, like_count, comment_count, email, location";

pub fn fetch_channels(conn: &Connection) -> Result<Vec<ChannelRecord>> {
    let sql = format!(
        "SELECT {} FROM channels ORDER BY discovered_at, channel_id",
        RECORD_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], row_to_record)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Channels whose enrichment never completed, for the `enrich` command.
pub fn fetch_unenriched(conn: &Connection, limit: Option<usize>) -> Result<Vec<ChannelRecord>> {
    let sql = format!(
        "SELECT {} FROM channels WHERE enriched = 0 ORDER BY discovered_at, channel_id{}",
        RECORD_COLUMNS,
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], row_to_record)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub processed_videos: usize,
    pub processed_channels: usize,
    pub channels: usize,
    pub enriched: usize,
    pub with_email: usize,
    pub with_location: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let processed_videos: usize = conn.query_row(
        "SELECT COUNT(*) FROM processed_ids WHERE kind = 'video'",
        [],
        |r| r.get(0),
    )?;
    let processed_channels: usize = conn.query_row(
        "SELECT COUNT(*) FROM processed_ids WHERE kind = 'channel'",
        [],
        |r| r.get(0),
    )?;
    let channels: usize = conn.query_row("SELECT COUNT(*) FROM channels", [], |r| r.get(0))?;
    let enriched: usize = conn.query_row(
        "SELECT COUNT(*) FROM channels WHERE enriched = 1",
        [],
        |r| r.get(0),
    )?;
    let with_email: usize = conn.query_row(
        "SELECT COUNT(*) FROM channels WHERE email IS NOT NULL AND email != ''",
        [],
        |r| r.get(0),
    )?;
    let with_location: usize = conn.query_row(
        "SELECT COUNT(*) FROM channels WHERE location IS NOT NULL AND location != ''",
        [],
        |r| r.get(0),
    )?;
    Ok(Stats {
        processed_videos,
        processed_channels,
        channels,
        enriched,
        with_email,
        with_location,
    })
}

// ── Tests ──
