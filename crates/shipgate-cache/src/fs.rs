use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::snapshot::check_relative;
use crate::{
    CacheError, CacheKey, CacheStore, CachedEntry, EntryMeta, PutOutcome, Result, Snapshot,
    SnapshotFile, SnapshotRoot,
};

const ENTRY_FILE: &str = "entry.json";

/// Filesystem-backed cache store.
///
/// Layout: `<root>/entries/<key>/entry.json` plus the file tree under
/// `<root>/entries/<key>/files/<root index>/`. Entries are assembled in
/// `<root>/staging/` and moved into place with a single rename, so readers
/// never observe a half-written entry.
///
/// File contents are copied file by file and never held in memory: `get`
/// returns a manifest pointing into the entry directory, which stays valid
/// because entries are never rewritten.
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    entries_dir: PathBuf,
    staging_dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    meta: EntryMeta,
    roots: Vec<StoredRoot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRoot {
    label: String,
    files: Vec<StoredFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredFile {
    path: PathBuf,
    executable: bool,
}

impl FsCacheStore {
    /// Create a store rooted at `root`. Creates `entries/` and `staging/` if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let entries_dir = root.join("entries");
        let staging_dir = root.join("staging");
        fs::create_dir_all(&entries_dir)?;
        fs::create_dir_all(&staging_dir)?;
        Ok(Self {
            entries_dir,
            staging_dir,
        })
    }

    fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.entries_dir.join(key.as_str())
    }

    fn read_meta(&self, dir: &Path, key: &str) -> Result<Option<StoredEntry>> {
        let path = dir.join(ENTRY_FILE);
        let content = match fs::read(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored = serde_json::from_slice(&content).map_err(|e| CacheError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(stored))
    }

    fn get_blocking(&self, key: &CacheKey) -> Result<Option<CachedEntry>> {
        let dir = self.entry_dir(key);
        let Some(stored) = self.read_meta(&dir, key.as_str())? else {
            return Ok(None);
        };

        let mut roots = Vec::with_capacity(stored.roots.len());
        for (index, root) in stored.roots.into_iter().enumerate() {
            let base = dir.join("files").join(index.to_string());
            let mut snapshot_root = SnapshotRoot {
                label: root.label,
                ..Default::default()
            };
            for file in root.files {
                check_relative(&file.path)?;
                let location = base.join(&file.path);
                let meta = fs::metadata(&location).map_err(|e| CacheError::Corrupt {
                    key: key.to_string(),
                    reason: format!("{}: {}", file.path.display(), e),
                })?;
                snapshot_root.files.insert(
                    file.path,
                    SnapshotFile::on_disk(location, meta.len(), file.executable),
                );
            }
            roots.push(snapshot_root);
        }

        Ok(Some(CachedEntry {
            meta: stored.meta,
            snapshot: Snapshot { roots },
        }))
    }

    fn put_blocking(&self, key: &CacheKey, snapshot: &Snapshot) -> Result<PutOutcome> {
        let dest = self.entry_dir(key);
        if self.contains_blocking(key) {
            return Ok(PutOutcome::AlreadyExists);
        }

        let staging = TempDir::new_in(&self.staging_dir)?;
        let mut roots = Vec::with_capacity(snapshot.roots.len());
        for (index, root) in snapshot.roots.iter().enumerate() {
            let base = staging.path().join("files").join(index.to_string());
            fs::create_dir_all(&base)?;
            let mut files = Vec::with_capacity(root.files.len());
            for (relative, file) in &root.files {
                check_relative(relative)?;
                file.copy_to(&base.join(relative))?;
                files.push(StoredFile {
                    path: relative.clone(),
                    executable: file.executable,
                });
            }
            roots.push(StoredRoot {
                label: root.label.clone(),
                files,
            });
        }

        let stored = StoredEntry {
            meta: EntryMeta::for_snapshot(key, snapshot),
            roots,
        };
        fs::write(
            staging.path().join(ENTRY_FILE),
            serde_json::to_vec_pretty(&stored)?,
        )?;

        // A rename onto an existing non-empty directory fails, which is how a
        // concurrent writer for the same key loses.
        match fs::rename(staging.path(), &dest) {
            Ok(()) => Ok(PutOutcome::Stored),
            Err(_) if dest.join(ENTRY_FILE).exists() => Ok(PutOutcome::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    fn contains_blocking(&self, key: &CacheKey) -> bool {
        self.entry_dir(key).join(ENTRY_FILE).exists()
    }

    fn list_blocking(&self) -> Result<Vec<EntryMeta>> {
        let mut metas = Vec::new();
        for entry in fs::read_dir(&self.entries_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.read_meta(&entry.path(), &name) {
                Ok(Some(stored)) => metas.push(stored.meta),
                Ok(None) => {}
                Err(e) => tracing::warn!(entry = %name, error = %e, "skipping unreadable cache entry"),
            }
        }
        metas.sort_by(|a, b| (a.saved_at, &a.key).cmp(&(b.saved_at, &b.key)));
        Ok(metas)
    }
}

async fn blocking<T, F>(store: &FsCacheStore, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&FsCacheStore) -> Result<T> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| CacheError::Unavailable(format!("cache worker failed: {e}")))?
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedEntry>> {
        let key = key.clone();
        blocking(self, move |s| s.get_blocking(&key)).await
    }

    async fn contains(&self, key: &CacheKey) -> Result<bool> {
        let key = key.clone();
        blocking(self, move |s| Ok(s.contains_blocking(&key))).await
    }

    async fn latest_with_prefix(&self, prefix: &str) -> Result<Option<EntryMeta>> {
        let prefix = prefix.to_string();
        blocking(self, move |s| {
            Ok(s.list_blocking()?
                .into_iter()
                .filter(|m| m.key.as_str().starts_with(&prefix))
                .last())
        })
        .await
    }

    async fn put_if_absent(&self, key: &CacheKey, snapshot: Snapshot) -> Result<PutOutcome> {
        let key = key.clone();
        blocking(self, move |s| s.put_blocking(&key, &snapshot)).await
    }

    async fn list(&self) -> Result<Vec<EntryMeta>> {
        blocking(self, |s| s.list_blocking()).await
    }
}
