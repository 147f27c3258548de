//! Storage backend abstraction for cache entries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CacheKey, Result, Snapshot};

/// Bookkeeping stored next to every entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub key: CacheKey,
    pub saved_at: DateTime<Utc>,
    pub file_count: usize,
    pub total_bytes: u64,
}

impl EntryMeta {
    pub fn for_snapshot(key: &CacheKey, snapshot: &Snapshot) -> Self {
        Self {
            key: key.clone(),
            saved_at: Utc::now(),
            file_count: snapshot.file_count(),
            total_bytes: snapshot.total_bytes(),
        }
    }
}

/// An entry read back from a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub meta: EntryMeta,
    pub snapshot: Snapshot,
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// Another writer got there first; the stored entry is unchanged.
    AlreadyExists,
}

/// Key-value store for cache entries.
///
/// Entries are immutable once written: `put_if_absent` never replaces an
/// existing key, so concurrent saves of the same key leave exactly one
/// winner.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedEntry>>;

    async fn contains(&self, key: &CacheKey) -> Result<bool>;

    /// Most recently saved entry whose key starts with `prefix`.
    async fn latest_with_prefix(&self, prefix: &str) -> Result<Option<EntryMeta>>;

    async fn put_if_absent(&self, key: &CacheKey, snapshot: Snapshot) -> Result<PutOutcome>;

    /// All entries, oldest first.
    async fn list(&self) -> Result<Vec<EntryMeta>>;
}
