use std::fs::{File, OpenOptions};
use std::path::Path;

use anyhow::{Context, Result};

use crate::db::ChannelRecord;

const HEADER: [&str; 10] = [
    "channel_id",
    "handle",
    "title",
    "subscriber_count",
    "video_count",
    "view_count",
    "like_count",
    "comment_count",
    "email",
    "location",
];

/// Append-only CSV sink with a flush after every record, so a crash loses at
/// most the in-flight row. Re-opening an existing file appends; the header is
/// written only when the file is new or empty.
pub struct CsvWriter {
    inner: csv::Writer<File>,
}

impl CsvWriter {
    pub fn append_to(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let needs_header = match std::fs::metadata(path) {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open output file {}", path.display()))?;
        let mut inner = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if needs_header {
            inner.write_record(HEADER)?;
            inner.flush()?;
        }
        Ok(Self { inner })
    }

    pub fn append(&mut self, record: &ChannelRecord) -> Result<()> {
        self.inner.serialize(record)?;
        self.inner.flush()?;
        Ok(())
    }
}

/// Read a whole output file back. Used by `export`/round-trip checks.
pub fn load(path: &Path) -> Result<Vec<ChannelRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open output file {}", path.display()))?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        records.push(row?);
    }
    Ok(records)
}

/// Write a fresh export of all records to `path` (truncating, header first).
pub fn export(path: &Path, records: &[ChannelRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create export file {}", path.display()))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

// ── Tests ──
