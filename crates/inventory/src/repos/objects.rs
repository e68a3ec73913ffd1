//! Cached object records.

use crate::error::InventoryResult;
use crate::models::CacheObject;
use crate::strategy::{ScoredObject, SizeLimitedSelection};
use async_trait::async_trait;
use bagcache_core::roles::VolumeStatus;
use serde_json::{Map, Value};

/// Repository for cached object records.
#[async_trait]
pub trait ObjectRepo: Send + Sync {
    /// Record that an object was stored in a volume.
    ///
    /// Any existing record for the same volume and name is replaced. The
    /// metadata fields `size`, `checksum`, `checksumAlgorithm`, `priority`,
    /// `pdrid` and `ediid` fill their own columns; the whole map is kept as
    /// well, with `since`/`sinceDate` set to now.
    async fn add_object(
        &self,
        id: &str,
        volume: &str,
        name: &str,
        metadata: &Map<String, Value>,
    ) -> InventoryResult<CacheObject>;

    /// All copies of an object in volumes at or above `min_status`. At
    /// [`VolumeStatus::Get`] and above only copies still cached are returned.
    async fn find_object(&self, id: &str, min_status: VolumeStatus)
    -> InventoryResult<Vec<CacheObject>>;

    /// The record for a given name in a volume, cached or not.
    async fn find_object_in(&self, volume: &str, name: &str)
    -> InventoryResult<Option<CacheObject>>;

    /// Mark an object as no longer cached, keeping its history.
    async fn remove_object(&self, volume: &str, name: &str) -> InventoryResult<()>;

    /// Delete an object's record entirely.
    async fn purge_object(&self, volume: &str, name: &str) -> InventoryResult<()>;

    /// Merge metadata into an existing record. Returns false if there is no
    /// such record.
    async fn update_metadata(
        &self,
        volume: &str,
        name: &str,
        delta: &Map<String, Value>,
    ) -> InventoryResult<bool>;

    /// Set the access time to now.
    async fn update_access_time(&self, volume: &str, name: &str) -> InventoryResult<bool>;

    /// Set the time of the last successful integrity check.
    async fn update_checked_time(&self, volume: &str, name: &str, time_ms: i64)
    -> InventoryResult<bool>;

    /// Deletion candidates from a volume, scored and sorted by the selection.
    ///
    /// Callers that act on the result must hold the planning lock.
    async fn select_objects_from(
        &self,
        volume: &str,
        selection: &mut SizeLimitedSelection,
    ) -> InventoryResult<Vec<ScoredObject>>;

    /// Cached objects last checked before `cutoff_ms`, least recently
    /// checked first.
    async fn select_objects_to_check(&self, cutoff_ms: i64, limit: u32)
    -> InventoryResult<Vec<CacheObject>>;

    /// Objects whose id matches an SQL `LIKE` pattern; a backslash escapes a wildcard.
    async fn select_objects_like_id(
        &self,
        pattern: &str,
        min_status: VolumeStatus,
    ) -> InventoryResult<Vec<CacheObject>>;
}
