//! Manifests of cached directories.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::{CacheError, Result};

/// A cached directory: its configured label and where it lives for this run.
///
/// The label (`~/.cargo/registry`, `target`) is what gets stored, so a
/// snapshot taken in one checkout unpacks into the matching directory of
/// another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePath {
    pub label: String,
    pub path: PathBuf,
}

impl CachePath {
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
        }
    }

    /// Resolve a configured label: `~/` against `home`, relative paths against
    /// `checkout`, absolute paths as-is. Without a home directory `~/` falls
    /// back to the checkout.
    pub fn resolve(label: &str, checkout: &Path, home: Option<&Path>) -> Self {
        let path = if let Some(rest) = label.strip_prefix("~/") {
            home.unwrap_or(checkout).join(rest)
        } else {
            let p = Path::new(label);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                checkout.join(p)
            }
        };
        Self::new(label, path)
    }

    pub fn resolve_all(labels: &[String], checkout: &Path, home: Option<&Path>) -> Vec<Self> {
        labels
            .iter()
            .map(|l| Self::resolve(l, checkout, home))
            .collect()
    }
}

/// Where the bytes of a snapshot file live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// A file on disk, streamed when copied.
    Disk(PathBuf),
    /// Bytes owned by an in-memory store.
    Inline(Arc<[u8]>),
}

/// One file inside a snapshot root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    pub source: FileSource,
    pub size: u64,
    pub executable: bool,
}

impl SnapshotFile {
    pub fn on_disk(path: impl Into<PathBuf>, size: u64, executable: bool) -> Self {
        Self {
            source: FileSource::Disk(path.into()),
            size,
            executable,
        }
    }

    pub fn inline(contents: impl Into<Arc<[u8]>>, executable: bool) -> Self {
        let contents = contents.into();
        Self {
            size: contents.len() as u64,
            source: FileSource::Inline(contents),
            executable,
        }
    }

    /// Copy the file to `dest`, creating parent directories. Disk sources are
    /// copied file-to-file without buffering the whole file.
    pub fn copy_to(&self, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match &self.source {
            FileSource::Disk(path) => {
                std::fs::copy(path, dest).map_err(|e| {
                    std::io::Error::new(e.kind(), format!("{}: {}", path.display(), e))
                })?;
            }
            FileSource::Inline(contents) => std::fs::write(dest, contents)?,
        }
        if self.executable {
            mark_executable(dest)?;
        }
        Ok(())
    }

    /// Pull the bytes into memory.
    pub fn into_inline(self) -> Result<Self> {
        match self.source {
            FileSource::Disk(path) => Ok(Self::inline(std::fs::read(path)?, self.executable)),
            FileSource::Inline(_) => Ok(self),
        }
    }
}

/// All files under one cached directory, keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotRoot {
    pub label: String,
    pub files: BTreeMap<PathBuf, SnapshotFile>,
}

/// The payload of one cache entry: a manifest of files and where to read
/// them from. Capturing only walks the tree; bytes move when a store copies
/// them in or `unpack` copies them out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub roots: Vec<SnapshotRoot>,
}

impl Snapshot {
    /// List every regular file under each path. Missing directories produce
    /// empty roots; symlinks are not followed.
    pub fn capture(paths: &[CachePath]) -> Result<Self> {
        let mut roots = Vec::with_capacity(paths.len());
        for cache_path in paths {
            let mut files = BTreeMap::new();
            capture_dir(&cache_path.path, &cache_path.path, &mut files)?;
            roots.push(SnapshotRoot {
                label: cache_path.label.clone(),
                files,
            });
        }
        Ok(Self { roots })
    }

    /// Copy files into the directories whose label matches a root.
    /// Roots with no matching path are skipped. Returns the number of files written.
    pub fn unpack(&self, paths: &[CachePath]) -> Result<usize> {
        let mut written = 0;
        for root in &self.roots {
            let Some(target) = paths.iter().find(|p| p.label == root.label) else {
                tracing::debug!(label = %root.label, "no destination for cached root; skipping");
                continue;
            };
            for (relative, file) in &root.files {
                check_relative(relative)?;
                file.copy_to(&target.path.join(relative))?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// The same manifest with every file's bytes held in memory.
    pub fn into_inline(self) -> Result<Self> {
        let mut roots = Vec::with_capacity(self.roots.len());
        for root in self.roots {
            let mut files = BTreeMap::new();
            for (relative, file) in root.files {
                files.insert(relative, file.into_inline()?);
            }
            roots.push(SnapshotRoot {
                label: root.label,
                files,
            });
        }
        Ok(Self { roots })
    }

    pub fn file_count(&self) -> usize {
        self.roots.iter().map(|r| r.files.len()).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.roots
            .iter()
            .flat_map(|r| r.files.values())
            .map(|f| f.size)
            .sum()
    }
}

fn capture_dir(root: &Path, dir: &Path, files: &mut BTreeMap<PathBuf, SnapshotFile>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            capture_dir(root, &path, files)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .map_err(|_| CacheError::UnsafePath(path.display().to_string()))?
                .to_path_buf();
            let meta = entry.metadata()?;
            let file = SnapshotFile::on_disk(&path, meta.len(), is_executable(&meta));
            files.insert(relative, file);
        }
    }

    Ok(())
}

/// Reject paths that would escape the destination root.
pub(crate) fn check_relative(path: &Path) -> Result<()> {
    let safe = !path.as_os_str().is_empty()
        && path.components().all(|c| matches!(c, Component::Normal(_)));
    if safe {
        Ok(())
    } else {
        Err(CacheError::UnsafePath(path.display().to_string()))
    }
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    false
}

#[cfg(unix)]
pub(crate) fn mark_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn mark_executable(_path: &Path) -> Result<()> {
    Ok(())
}
