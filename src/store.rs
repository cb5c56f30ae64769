use std::collections::HashSet;

use anyhow::Result;

/// What an identifier refers to. The canonical dedup key is the channel id
/// (one output row per channel); video ids are marked as well so already
/// scanned search hits are skipped without re-fetching channel stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Video,
    Channel,
}

impl IdKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IdKind::Video => "video",
            IdKind::Channel => "channel",
        }
    }
}

/// Durable set of already-processed identifiers.
///
/// `mark` is idempotent and must persist before enrichment starts, so an
/// interrupted run never enriches the same identifier twice.
pub trait IdStore {
    fn seen(&self, id: &str) -> Result<bool>;
    fn mark(&mut self, id: &str, kind: IdKind) -> Result<()>;
}

/// In-memory backend, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryIdStore {
    ids: HashSet<String>,
}

impl MemoryIdStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

impl IdStore for MemoryIdStore {
    fn seen(&self, id: &str) -> Result<bool> {
        Ok(self.ids.contains(id))
    }

    fn mark(&mut self, id: &str, _kind: IdKind) -> Result<()> {
        self.ids.insert(id.to_string());
        Ok(())
    }
}
