//! Storage error types.

use thiserror::Error;

/// Errors raised by a cache volume.
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("{volume}: object not found: {name}")]
    NotFound { volume: String, name: String },

    #[error("invalid object name: {0}")]
    InvalidName(String),

    #[error("{volume}: failed to save {name}: {source}")]
    SaveFailed {
        volume: String,
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VolumeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type for cache volume operations.
pub type VolumeResult<T> = std::result::Result<T, VolumeError>;

/// Errors raised by long-term bag storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bag not found: {0}")]
    NotFound(String),

    #[error("invalid bag name: {0}")]
    InvalidName(String),

    #[error("storage in unexpected state: {0}")]
    State(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for long-term storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
