//! Exclusive write slots in a cache volume.

use crate::cache::{CacheEvent, PendingSpace};
use crate::error::{CacheError, CacheResult};
use bagcache_core::hash::SHA256;
use bagcache_core::roles::CacheRoles;
use bagcache_inventory::{CacheObject, InventoryDb};
use bagcache_inventory::repos::ObjectRepo;
use bagcache_storage::{ByteStream, CacheVolume};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Space set aside in one volume for one incoming object.
///
/// The reserved bytes count against the volume until the reservation is
/// saved into or dropped.
pub struct Reservation {
    volume: Arc<dyn CacheVolume>,
    db: Arc<dyn InventoryDb>,
    roles: CacheRoles,
    size: u64,
    pending: Arc<PendingSpace>,
    events: broadcast::Sender<CacheEvent>,
}

impl Reservation {
    pub(crate) fn new(
        volume: Arc<dyn CacheVolume>,
        db: Arc<dyn InventoryDb>,
        roles: CacheRoles,
        size: u64,
        pending: Arc<PendingSpace>,
        events: broadcast::Sender<CacheEvent>,
    ) -> Self {
        pending.add(volume.name(), size);
        let _ = events.send(CacheEvent::ReservationMade {
            volume: volume.name().to_string(),
            size,
        });
        Self {
            volume,
            db,
            roles,
            size,
            pending,
            events,
        }
    }

    pub fn volume_name(&self) -> &str {
        self.volume.name()
    }

    /// Roles of the volume the space was reserved in.
    pub fn roles(&self) -> CacheRoles {
        self.roles
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Write `data` into the reserved volume under `name` and record it in
    /// the inventory as a copy of `id`.
    ///
    /// Either the object ends up both stored and registered, or neither.
    /// The save fails with [`CacheError::Integrity`] when more bytes arrive
    /// than were reserved, when a `size` metadatum disagrees with the bytes
    /// received, or when a SHA-256 `checksum` metadatum disagrees with their
    /// digest.
    pub async fn save_as(
        self,
        data: ByteStream,
        id: &str,
        name: &str,
        mut metadata: Map<String, Value>,
    ) -> CacheResult<CacheObject> {
        let stored = self.volume.save_as(name, data).await?;

        if stored.size > self.size {
            self.discard(name).await;
            return Err(CacheError::integrity(
                id,
                format!(
                    "received {} bytes, more than the {} reserved",
                    stored.size, self.size
                ),
            ));
        }
        if let Some(expected) = metadata.get("size").and_then(Value::as_u64)
            && expected != stored.size
        {
            self.discard(name).await;
            return Err(CacheError::integrity(
                id,
                format!(
                    "expected {expected} bytes, received {}",
                    stored.size
                ),
            ));
        }
        metadata.insert("size".into(), stored.size.into());

        let algorithm = metadata
            .get("checksumAlgorithm")
            .and_then(Value::as_str)
            .unwrap_or(SHA256);
        if algorithm == SHA256
            && let Some(expected) = metadata.get("checksum").and_then(Value::as_str)
            && !stored.checksum.matches_hex(expected)
        {
            self.discard(name).await;
            return Err(CacheError::integrity(
                id,
                format!(
                    "checksum mismatch: expected {expected}, computed {}",
                    stored.checksum.to_hex()
                ),
            ));
        }

        let object = match self
            .db
            .add_object(id, self.volume.name(), name, &metadata)
            .await
        {
            Ok(object) => object,
            Err(e) => {
                self.discard(name).await;
                return Err(e.into());
            }
        };

        tracing::info!(
            id = %id,
            volume = %self.volume.name(),
            name = %name,
            size = stored.size,
            "Cached object"
        );
        let _ = self.events.send(CacheEvent::ObjectSaved {
            volume: self.volume.name().to_string(),
            id: id.to_string(),
            name: name.to_string(),
            size: stored.size,
        });
        Ok(object)
    }

    /// Give the reserved space back without saving anything.
    pub fn drop_reservation(self) {}

    async fn discard(&self, name: &str) {
        if let Err(e) = self.volume.remove(name).await {
            tracing::error!(
                volume = %self.volume.name(),
                name = %name,
                error = %e,
                "Failed to clean up rejected object"
            );
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.pending.release(self.volume.name(), self.size);
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("volume", &self.volume.name())
            .field("size", &self.size)
            .field("roles", &self.roles)
            .finish()
    }
}
