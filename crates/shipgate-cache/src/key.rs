//! Cache keys derived from dependency lock files.
//!
//! A key has the shape `{os}-{prefix}-{hash}` where `hash` is the SHA-256 of
//! every lock file found in the checkout. Any change to any lock file yields
//! a different key; identical lock files on the same OS always agree.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{CacheError, Result};

/// Directories never searched for lock files.
const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules"];

/// OS family component used in keys produced on this host.
pub fn os_family() -> &'static str {
    std::env::consts::OS
}

/// Identifier of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    /// Validate `key` for use as a store name.
    ///
    /// Allowed characters are ASCII alphanumerics, `-`, `_` and `.`; the key
    /// may not start with `.`.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        validate_key_text(&key)?;
        Ok(Self(key))
    }

    /// Build `{os}-{prefix}-{hash}`.
    pub fn from_parts(os: &str, prefix: &str, hash: &str) -> Result<Self> {
        Self::new(format!("{os}-{prefix}-{hash}"))
    }

    /// Key for the lock files under `root` on this host.
    pub fn for_checkout(root: &Path, lock_file: &str, prefix: &str) -> Result<Self> {
        let hash = hash_lock_files(root, lock_file)?;
        Self::from_parts(os_family(), prefix, &hash)
    }

    /// Prefix shared by every key for `prefix` on `os`, used for fallback restores.
    pub fn fallback_prefix(os: &str, prefix: &str) -> String {
        format!("{os}-{prefix}-")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CacheKey {
    type Error = CacheError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

fn validate_key_text(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('.') {
        return Err(CacheError::InvalidKey(key.to_string()));
    }
    let valid = key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(CacheError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// SHA-256 over every file named `lock_file` under `root`.
///
/// Files are visited in path order; each contributes its relative path and
/// its bytes. Returns an empty string when no lock file exists.
pub fn hash_lock_files(root: &Path, lock_file: &str) -> Result<String> {
    let mut files = Vec::new();
    collect_lock_files(root, lock_file, &mut files)?;
    if files.is_empty() {
        return Ok(String::new());
    }
    files.sort();

    let mut hasher = Sha256::new();
    for path in &files {
        let relative = path.strip_prefix(root).unwrap_or(path);
        hasher.update(slash_path(relative).as_bytes());
        hasher.update(b":");
        hasher.update(std::fs::read(path)?);
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}

fn collect_lock_files(dir: &Path, lock_file: &str, files: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            if SKIP_DIRS.contains(&name.as_ref()) {
                continue;
            }
            collect_lock_files(&path, lock_file, files)?;
        } else if file_type.is_file() && name == lock_file {
            files.push(path);
        }
    }

    Ok(())
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
