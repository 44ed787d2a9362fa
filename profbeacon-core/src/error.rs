//! Error types for profbeacon-core

use thiserror::Error;

/// Main error type for the profbeacon-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Profiler capability error (start/pause/resume/stop/get_profile)
    #[error("profiler error: {0}")]
    Profiler(String),

    /// Collection endpoint error (register, signing, upload)
    #[error("collector error: {0}")]
    Collector(String),

    /// Key-value storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Compression worker error
    #[error("compression error: {0}")]
    Compression(String),

    /// Payload bytes no longer match the digest taken at enqueue time
    #[error("payload integrity check failed for entry {id}: expected {expected}, got {actual}")]
    Integrity {
        id: u64,
        expected: String,
        actual: String,
    },

    /// The controller task is gone
    #[error("controller is not running")]
    ControllerStopped,
}

/// Result type alias for profbeacon-core
pub type Result<T> = std::result::Result<T, Error>;
