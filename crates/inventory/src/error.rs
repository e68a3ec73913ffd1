//! Inventory database error types.

use thiserror::Error;

/// Inventory database operation errors.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("volume not found: {0}")]
    VolumeNotFound(String),

    #[error("not a registered checksum algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("{name}: metadatum has unexpected type: {detail}")]
    Metadata { name: String, detail: String },

    #[error("unparseable metadata stored for {volume}:{object}: {source}")]
    CorruptMetadata {
        volume: String,
        object: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] bagcache_core::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl InventoryError {
    pub(crate) fn metadata(name: &str, detail: impl Into<String>) -> Self {
        Self::Metadata {
            name: name.to_string(),
            detail: detail.into(),
        }
    }
}

/// Result type for inventory operations.
pub type InventoryResult<T> = std::result::Result<T, InventoryError>;
