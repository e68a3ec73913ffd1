//! Restoring objects from long-term storage into a cache.

pub mod archive;
pub mod dataset;
pub mod headbag;
pub mod naming;

pub use dataset::DatasetRestorer;
pub use headbag::{BagRestorer, HeadBagCache, HeadBagContents};

use crate::error::CacheResult;
use crate::reservation::Reservation;
use async_trait::async_trait;
use bagcache_core::roles::CacheRoles;
use bagcache_inventory::CacheObject;
use serde_json::{Map, Value};

/// Knows how to fetch an object by id from long-term storage.
#[async_trait]
pub trait Restorer: Send + Sync {
    /// True if the id cannot be resolved at all.
    async fn does_not_exist(&self, id: &str) -> CacheResult<bool>;

    /// Size of the object; `None` if it does not exist.
    async fn get_size_of(&self, id: &str) -> CacheResult<Option<u64>>;

    /// Hex SHA-256 of the object, if known.
    async fn get_checksum(&self, id: &str) -> CacheResult<Option<String>>;

    /// Copy the object into the reserved space under `name`, merging
    /// `metadata` into whatever the restorer knows about it.
    async fn restore_object(
        &self,
        id: &str,
        reservation: Reservation,
        name: &str,
        metadata: Map<String, Value>,
    ) -> CacheResult<CacheObject>;

    /// Storage name for an object placed in a volume with the given roles.
    fn name_for_object(&self, id: &str, roles: CacheRoles) -> String;

    /// Roles preferred for an object of the given size. Empty means any
    /// volume.
    async fn preferences_for(&self, _id: &str, _size: u64) -> CacheResult<CacheRoles> {
        Ok(CacheRoles::NONE)
    }
}
