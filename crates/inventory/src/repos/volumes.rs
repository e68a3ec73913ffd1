//! Volume and checksum-algorithm registration.

use crate::error::InventoryResult;
use crate::models::{VolumeInfo, VolumeRecord};
use async_trait::async_trait;
use bagcache_core::roles::VolumeStatus;

/// Repository for the volumes an inventory tracks.
#[async_trait]
pub trait VolumeRepo: Send + Sync {
    /// Register a volume, or update the capacity and description of an
    /// already registered one.
    async fn register_volume(
        &self,
        name: &str,
        capacity: u64,
        info: &VolumeInfo,
    ) -> InventoryResult<()>;

    /// Names of all registered volumes.
    async fn volumes(&self) -> InventoryResult<Vec<String>>;

    /// Get a registered volume's description.
    async fn get_volume_info(&self, name: &str) -> InventoryResult<Option<VolumeRecord>>;

    /// Change a volume's status.
    ///
    /// Fails with `VolumeNotFound` if the volume is not registered.
    async fn set_volume_status(&self, name: &str, status: VolumeStatus) -> InventoryResult<()>;

    async fn get_volume_status(&self, name: &str) -> InventoryResult<VolumeStatus>;

    /// Capacity minus the bytes held by cached objects. Negative if the
    /// volume is over-full.
    async fn get_available_space(&self, name: &str) -> InventoryResult<i64>;

    /// Bytes held by cached objects.
    async fn get_used_space(&self, name: &str) -> InventoryResult<u64>;

    /// Register a checksum algorithm name; no-op if already known.
    async fn register_algorithm(&self, name: &str) -> InventoryResult<()>;

    async fn checksum_algorithms(&self) -> InventoryResult<Vec<String>>;
}
