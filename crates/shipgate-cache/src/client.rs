//! Restore and save operations used by pipeline steps.
//!
//! Both operations are best-effort: a store error or unreadable entry is
//! logged and reported as a miss or a failed save, never propagated as an
//! error that could fail a run.

use std::sync::Arc;

use serde::Serialize;

use crate::{
    CacheError, CacheKey, CacheStore, CachePath, CachedEntry, PutOutcome, Result, Snapshot,
};

/// What a restore found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RestoreOutcome {
    /// The exact key was present.
    Exact { key: CacheKey, files: usize },
    /// The exact key was absent; the newest entry under a fallback prefix was used.
    Fallback {
        requested: CacheKey,
        matched: CacheKey,
        files: usize,
    },
    Miss { key: CacheKey },
}

impl RestoreOutcome {
    pub fn is_hit(&self) -> bool {
        !matches!(self, RestoreOutcome::Miss { .. })
    }

    /// Key whose contents were restored, if any.
    pub fn matched_key(&self) -> Option<&CacheKey> {
        match self {
            RestoreOutcome::Exact { key, .. } => Some(key),
            RestoreOutcome::Fallback { matched, .. } => Some(matched),
            RestoreOutcome::Miss { .. } => None,
        }
    }
}

/// What a save did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SaveOutcome {
    Saved { key: CacheKey, files: usize },
    /// An entry already exists under the key and was left untouched.
    AlreadyExists { key: CacheKey },
    Failed { key: CacheKey, reason: String },
}

/// Dependency cache over any `CacheStore`.
#[derive(Clone)]
pub struct DependencyCache {
    store: Arc<dyn CacheStore>,
}

impl DependencyCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Find the entry for `key`, else the newest entry under the first
    /// fallback prefix that has one.
    pub async fn lookup(
        &self,
        key: &CacheKey,
        fallback_prefixes: &[String],
    ) -> Result<Option<CachedEntry>> {
        if let Some(entry) = self.store.get(key).await? {
            return Ok(Some(entry));
        }
        for prefix in fallback_prefixes {
            if let Some(meta) = self.store.latest_with_prefix(prefix).await? {
                if let Some(entry) = self.store.get(&meta.key).await? {
                    return Ok(Some(entry));
                }
            }
        }
        Ok(None)
    }

    /// Restore `key` (or a fallback) into `paths`.
    pub async fn restore(
        &self,
        key: &CacheKey,
        fallback_prefixes: &[String],
        paths: &[CachePath],
    ) -> RestoreOutcome {
        let entry = match self.lookup(key, fallback_prefixes).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::info!(key = %key, "cache miss");
                return RestoreOutcome::Miss { key: key.clone() };
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache lookup failed; treating as miss");
                return RestoreOutcome::Miss { key: key.clone() };
            }
        };

        let snapshot = entry.snapshot;
        let dest = paths.to_vec();
        let unpacked = tokio::task::spawn_blocking(move || snapshot.unpack(&dest))
            .await
            .unwrap_or_else(|e| Err(CacheError::Unavailable(format!("cache worker failed: {e}"))));
        let files = match unpacked {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(key = %entry.meta.key, error = %e, "cache unpack failed; treating as miss");
                return RestoreOutcome::Miss { key: key.clone() };
            }
        };

        if &entry.meta.key == key {
            tracing::info!(key = %key, files, "cache hit");
            RestoreOutcome::Exact {
                key: key.clone(),
                files,
            }
        } else {
            tracing::info!(key = %key, matched = %entry.meta.key, files, "cache restored from fallback");
            RestoreOutcome::Fallback {
                requested: key.clone(),
                matched: entry.meta.key,
                files,
            }
        }
    }

    /// Capture `paths` and store them under `key` unless the key already exists.
    pub async fn save(&self, key: &CacheKey, paths: &[CachePath]) -> SaveOutcome {
        match self.store.contains(key).await {
            Ok(true) => {
                tracing::info!(key = %key, "cache entry already exists; not saving");
                return SaveOutcome::AlreadyExists { key: key.clone() };
            }
            Ok(false) => {}
            Err(e) => return failed(key, e),
        }

        let sources = paths.to_vec();
        let captured = tokio::task::spawn_blocking(move || Snapshot::capture(&sources))
            .await
            .unwrap_or_else(|e| Err(CacheError::Unavailable(format!("cache worker failed: {e}"))));
        let snapshot = match captured {
            Ok(s) => s,
            Err(e) => return failed(key, e),
        };
        let files = snapshot.file_count();

        match self.store.put_if_absent(key, snapshot).await {
            Ok(PutOutcome::Stored) => {
                tracing::info!(key = %key, files, "cache saved");
                SaveOutcome::Saved {
                    key: key.clone(),
                    files,
                }
            }
            Ok(PutOutcome::AlreadyExists) => {
                tracing::info!(key = %key, "cache entry written concurrently; keeping existing");
                SaveOutcome::AlreadyExists { key: key.clone() }
            }
            Err(e) => failed(key, e),
        }
    }
}

fn failed(key: &CacheKey, error: impl std::fmt::Display) -> SaveOutcome {
    tracing::warn!(key = %key, error = %error, "cache save failed");
    SaveOutcome::Failed {
        key: key.clone(),
        reason: error.to_string(),
    }
}
