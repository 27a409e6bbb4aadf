//! Error types for codeloom-core

use thiserror::Error;

/// Main error type for the codeloom-core library
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

    /// The chunk source reported an error frame or failed mid-stream
    #[error("stream error: {0}")]
    Stream(String),

    /// Snapshot or file store failure
    #[error("store error: {0}")]
    Store(String),

    /// Project not found in any store
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    /// Another writer holds the project
    #[error("lock error: {0}")]
    Lock(String),
}

/// Result type alias for codeloom-core
pub type Result<T> = std::result::Result<T, Error>;
