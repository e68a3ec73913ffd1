//! Cache management error types.
//!
//! Every failure raised by this crate is a [`CacheError`]; errors from the
//! inventory, volumes and long-term storage are wrapped so callers have one
//! type to match on while the original kind stays visible.

use bagcache_inventory::InventoryError;
use bagcache_storage::{StorageError, VolumeError};
use thiserror::Error;

/// Cache management errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The identifier cannot be resolved in any store.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// A head bag, lookup table or member bag could not be used.
    #[error("restoration failed for {id}: {detail}")]
    Restoration { id: String, detail: String },

    #[error("no volumes available with roles {0}")]
    NoMatchingVolumes(String),

    #[error("unable to free space: {0}")]
    DeletionFailure(String),

    /// Stored bytes do not match what was recorded or expected.
    #[error("integrity check failed for {id}: {detail}")]
    Integrity { id: String, detail: String },

    /// An object could not be checked, e.g. for lack of a recorded checksum.
    #[error("unable to check {id}: {detail}")]
    Unverifiable { id: String, detail: String },

    #[error("malformed bag archive {bag}: {source}")]
    Archive {
        bag: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error(transparent)]
    Parse(#[from] bagcache_core::Error),

    #[error("unparseable metadata: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    pub(crate) fn restoration(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Restoration {
            id: id.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn unverifiable(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Unverifiable {
            id: id.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn integrity(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Integrity {
            id: id.into(),
            detail: detail.into(),
        }
    }

    /// True if the error means something was absent rather than broken.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::ObjectNotFound(_) => true,
            Self::Volume(e) => e.is_not_found(),
            Self::Storage(StorageError::NotFound(_)) => true,
            _ => false,
        }
    }

    /// True if an object could not be judged either way.
    pub fn is_unverifiable(&self) -> bool {
        matches!(self, Self::Unverifiable { .. })
    }

    /// True if the error reports corrupted or mismatched content.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }
}

/// Result type for cache management operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
