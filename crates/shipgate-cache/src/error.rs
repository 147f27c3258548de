//! Error types for shipgate-cache

use thiserror::Error;

/// Errors that can occur in the dependency cache
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key contains characters that are not safe as a store name
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    /// Stored entry could not be read back
    #[error("Corrupt cache entry {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// Snapshot path points outside its root
    #[error("Unsafe path in snapshot: {0}")]
    UnsafePath(String),

    /// Store cannot be reached
    #[error("Cache store unavailable: {0}")]
    Unavailable(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}
