//! Shipgate Dependency Cache
//!
//! Content-keyed cache of build dependencies and outputs:
//! - Keys derived from the SHA-256 of every lock file in a checkout
//! - Snapshots of the cached directories (`~/.cargo/registry`, `target`, ...)
//! - Immutable entries with first-write-wins saves
//! - Prefix fallback restores when the exact key is absent

pub mod client;
pub mod error;
pub mod fs;
pub mod key;
pub mod memory;
pub mod snapshot;
pub mod store;

pub use client::{DependencyCache, RestoreOutcome, SaveOutcome};
pub use error::CacheError;
pub use fs::FsCacheStore;
pub use key::{hash_lock_files, os_family, CacheKey};
pub use memory::MemoryCacheStore;
pub use snapshot::{CachePath, FileSource, Snapshot, SnapshotFile, SnapshotRoot};
pub use store::{CacheStore, CachedEntry, EntryMeta, PutOutcome};

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Directories cached by default, relative to the checkout or `~`.
pub const DEFAULT_CACHE_PATHS: &[&str] = &["~/.cargo/registry", "~/.cargo/git", "target"];

/// Default key prefix.
pub const DEFAULT_KEY_PREFIX: &str = "cargo";

/// Default lock file name hashed into keys.
pub const DEFAULT_LOCK_FILE: &str = "Cargo.lock";
