//! In-memory cache store for tests and dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    CacheError, CacheKey, CacheStore, CachedEntry, EntryMeta, PutOutcome, Result, Snapshot,
};

#[derive(Debug)]
struct Slot {
    seq: u64,
    meta: EntryMeta,
    snapshot: Snapshot,
}

#[derive(Debug, Default)]
struct Inner {
    next_seq: u64,
    entries: HashMap<CacheKey, Slot>,
}

/// `CacheStore` backed by a `Mutex<HashMap>`.
///
/// Recency is a write counter rather than a timestamp, so entries saved in
/// quick succession still order deterministically. File contents are pulled
/// into memory on put, so entries outlive the directories they came from.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail, simulating an unreachable backend.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("memory store marked unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedEntry>> {
        self.check_available()?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.entries.get(key).map(|slot| CachedEntry {
            meta: slot.meta.clone(),
            snapshot: slot.snapshot.clone(),
        }))
    }

    async fn contains(&self, key: &CacheKey) -> Result<bool> {
        self.check_available()?;
        Ok(self.inner.lock().unwrap().entries.contains_key(key))
    }

    async fn latest_with_prefix(&self, prefix: &str) -> Result<Option<EntryMeta>> {
        self.check_available()?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .entries
            .values()
            .filter(|slot| slot.meta.key.as_str().starts_with(prefix))
            .max_by_key(|slot| slot.seq)
            .map(|slot| slot.meta.clone()))
    }

    async fn put_if_absent(&self, key: &CacheKey, snapshot: Snapshot) -> Result<PutOutcome> {
        self.check_available()?;
        if self.inner.lock().unwrap().entries.contains_key(key) {
            return Ok(PutOutcome::AlreadyExists);
        }
        let snapshot = snapshot.into_inline()?;

        let mut inner = self.inner.lock().unwrap();
        if inner.entries.contains_key(key) {
            return Ok(PutOutcome::AlreadyExists);
        }
        inner.next_seq += 1;
        let slot = Slot {
            seq: inner.next_seq,
            meta: EntryMeta::for_snapshot(key, &snapshot),
            snapshot,
        };
        inner.entries.insert(key.clone(), slot);
        Ok(PutOutcome::Stored)
    }

    async fn list(&self) -> Result<Vec<EntryMeta>> {
        self.check_available()?;
        let inner = self.inner.lock().unwrap();
        let mut slots: Vec<&Slot> = inner.entries.values().collect();
        slots.sort_by_key(|slot| slot.seq);
        Ok(slots.into_iter().map(|slot| slot.meta.clone()).collect())
    }
}
