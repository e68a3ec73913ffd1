//! Space management over a set of cache volumes.
//!
//! A [`Cache`] owns the volumes of one inventory. Callers ask it for space
//! with [`Cache::reserve_space`]; when no matching volume has room, it plans
//! evictions in every candidate volume, ranks the plans and carries out the
//! cheapest one that frees enough space.

use crate::error::{CacheError, CacheResult};
use crate::reservation::Reservation;
use bagcache_core::config::CacheConfig;
use bagcache_core::roles::{CacheRoles, VolumeStatus};
use bagcache_inventory::{
    CacheObject, DeletionScorer, InventoryDb, ScoredObject, SizeLimitedSelection, VolumeInfo,
    VolumeRecord, scorer_from_config,
};
use bagcache_inventory::repos::{ObjectRepo, VolumeRepo};
use bagcache_storage::CacheVolume;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;

/// Extra space sought beyond the requested size when evicting.
const HEADROOM: f64 = 1.02;

/// How far past the needed amount a deletion selection may reach.
const SELECTION_SLACK: f64 = 1.2;

/// Notifications published as a cache changes.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    ReservationMade {
        volume: String,
        size: u64,
    },
    ObjectSaved {
        volume: String,
        id: String,
        name: String,
        size: u64,
    },
    ObjectsDeleted {
        volume: String,
        ids: Vec<String>,
        freed: u64,
    },
}

/// Bytes promised to reservations that have not been saved yet, per volume.
#[derive(Debug, Default)]
pub(crate) struct PendingSpace(Mutex<HashMap<String, u64>>);

impl PendingSpace {
    pub(crate) fn add(&self, volume: &str, size: u64) {
        let mut map = self.0.lock().unwrap_or_else(|e| e.into_inner());
        *map.entry(volume.to_string()).or_default() += size;
    }

    pub(crate) fn release(&self, volume: &str, size: u64) {
        let mut map = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(held) = map.get_mut(volume) {
            *held = held.saturating_sub(size);
            if *held == 0 {
                map.remove(volume);
            }
        }
    }

    fn held(&self, volume: &str) -> u64 {
        let map = self.0.lock().unwrap_or_else(|e| e.into_inner());
        map.get(volume).copied().unwrap_or(0)
    }
}

#[derive(Clone)]
struct VolumeEntry {
    volume: Arc<dyn CacheVolume>,
    scorer: Option<Arc<dyn DeletionScorer>>,
}

/// Victims chosen in one volume to make room for a reservation.
#[derive(Debug)]
struct DeletionPlan {
    volume: String,
    victims: Vec<ScoredObject>,
    to_remove: u64,
    /// Lower is cheaper: candidates consumed per unit of deletability.
    score: f64,
}

/// A set of volumes sharing one inventory.
pub struct Cache {
    name: String,
    db: Arc<dyn InventoryDb>,
    volumes: RwLock<Vec<VolumeEntry>>,
    default_scorer: Arc<dyn DeletionScorer>,
    pending: Arc<PendingSpace>,
    events: broadcast::Sender<CacheEvent>,
}

impl Cache {
    pub fn new(
        name: impl Into<String>,
        db: Arc<dyn InventoryDb>,
        default_scorer: Arc<dyn DeletionScorer>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            name: name.into(),
            db,
            volumes: RwLock::new(Vec::new()),
            default_scorer,
            pending: Arc::new(PendingSpace::default()),
            events,
        }
    }

    /// Build a cache, its inventory and its volumes from configuration.
    pub async fn from_config(config: &CacheConfig) -> CacheResult<Arc<Self>> {
        config.validate().map_err(CacheError::Config)?;
        let db = bagcache_inventory::from_config(&config.inventory).await?;
        let cache = Self::new(&config.name, db, scorer_from_config(&config.strategy));
        for vc in &config.volumes {
            let volume = bagcache_storage::volume_from_config(vc).await?;
            let info = VolumeInfo {
                priority: vc.priority,
                status: vc.status,
                roles: vc.roles,
                redirect_base: vc.redirect_base.clone(),
                extra: Default::default(),
            };
            let scorer = vc.strategy.as_ref().map(scorer_from_config);
            cache.add_volume(volume, vc.capacity, info, scorer).await?;
        }
        tracing::info!(
            cache = %config.name,
            volumes = config.volumes.len(),
            "Cache initialized"
        );
        Ok(Arc::new(cache))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inventory(&self) -> &Arc<dyn InventoryDb> {
        &self.db
    }

    /// Receive notifications of reservations, saves and deletions.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Register a volume. Volumes are tried in the order they were added.
    pub async fn add_volume(
        &self,
        volume: Arc<dyn CacheVolume>,
        capacity: u64,
        info: VolumeInfo,
        scorer: Option<Arc<dyn DeletionScorer>>,
    ) -> CacheResult<()> {
        if self.volume(volume.name()).is_some() {
            return Err(CacheError::Config(format!(
                "{}: volume already added: {}",
                self.name,
                volume.name()
            )));
        }
        self.db.register_volume(volume.name(), capacity, &info).await?;
        tracing::debug!(
            cache = %self.name,
            volume = %volume.name(),
            capacity,
            status = %info.status,
            "Volume registered"
        );
        self.write_volumes().push(VolumeEntry { volume, scorer });
        Ok(())
    }

    pub fn volume(&self, name: &str) -> Option<Arc<dyn CacheVolume>> {
        self.read_volumes()
            .iter()
            .find(|e| e.volume.name() == name)
            .map(|e| e.volume.clone())
    }

    pub fn volume_names(&self) -> Vec<String> {
        self.read_volumes()
            .iter()
            .map(|e| e.volume.name().to_string())
            .collect()
    }

    /// Space left in a volume after cached objects and unsaved reservations.
    pub async fn available_space(&self, volume: &str) -> CacheResult<i64> {
        let avail = self.db.get_available_space(volume).await?;
        Ok(avail - self.pending.held(volume) as i64)
    }

    /// Reserve `size` bytes in a volume serving any of `prefs` (any
    /// updatable volume when `prefs` is empty), evicting objects if needed.
    pub async fn reserve_space(&self, size: u64, prefs: CacheRoles) -> CacheResult<Reservation> {
        let candidates = self.matching_volumes(prefs).await?;
        if candidates.is_empty() {
            return Err(CacheError::NoMatchingVolumes(prefs.to_string()));
        }

        let _guard = self.db.planning_lock().lock().await;

        let mut plans = Vec::new();
        for (entry, _) in &candidates {
            if let Some(plan) = self.plan_deletion(entry, size).await? {
                plans.push(plan);
            }
        }
        if plans.is_empty() {
            return Err(CacheError::DeletionFailure(format!(
                "{}: no volume can free {size} bytes",
                self.name
            )));
        }
        plans.sort_by(|a, b| a.score.total_cmp(&b.score));

        for plan in plans {
            let Some((entry, record)) = candidates
                .iter()
                .find(|(e, _)| e.volume.name() == plan.volume)
            else {
                continue;
            };
            match self.execute_plan(entry, plan, size).await {
                Ok(()) => {
                    return Ok(Reservation::new(
                        entry.volume.clone(),
                        self.db.clone(),
                        record.info.roles,
                        size,
                        self.pending.clone(),
                        self.events.clone(),
                    ));
                }
                Err(e) => {
                    tracing::warn!(
                        cache = %self.name,
                        volume = %entry.volume.name(),
                        error = %e,
                        "Deletion plan failed"
                    );
                }
            }
        }
        Err(CacheError::DeletionFailure(format!(
            "{}: all deletion plans failed to free {size} bytes",
            self.name
        )))
    }

    /// The first accessible copy of an object in a readable volume.
    ///
    /// If the inventory lists copies but none of their volumes still hold the
    /// bytes, the object is uncached and `None` returned.
    pub async fn find_object(&self, id: &str) -> CacheResult<Option<CacheObject>> {
        let copies = self.db.find_object(id, VolumeStatus::Get).await?;
        if copies.is_empty() {
            return Ok(None);
        }

        let mut failure = None;
        for copy in &copies {
            let Some(volume) = self.volume(&copy.volume) else {
                continue;
            };
            match volume.exists(&copy.name).await {
                Ok(true) => return Ok(Some(copy.clone())),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        id = %id,
                        volume = %copy.volume,
                        error = %e,
                        "Unable to check cached copy"
                    );
                    failure = Some(e);
                }
            }
        }
        if let Some(e) = failure {
            return Err(e.into());
        }

        tracing::warn!(id = %id, "Cached object missing from its volumes; uncaching");
        self.uncache(id).await?;
        Ok(None)
    }

    pub async fn is_cached(&self, id: &str) -> CacheResult<bool> {
        Ok(self.find_object(id).await?.is_some())
    }

    /// Remove every copy of an object from its volume and the inventory.
    pub async fn uncache(&self, id: &str) -> CacheResult<()> {
        let _guard = self.db.planning_lock().lock().await;
        for copy in self.db.find_object(id, VolumeStatus::Get).await? {
            self.remove_copy_unlocked(&copy).await?;
        }
        Ok(())
    }

    /// Remove one copy, holding the planning lock so that no concurrent
    /// eviction picks the same object.
    pub async fn remove_copy(&self, object: &CacheObject) -> CacheResult<()> {
        let _guard = self.db.planning_lock().lock().await;
        self.remove_copy_unlocked(object).await
    }

    async fn remove_copy_unlocked(&self, object: &CacheObject) -> CacheResult<()> {
        if let Some(volume) = self.volume(&object.volume)
            && !volume.remove(&object.name).await?
        {
            tracing::debug!(
                volume = %object.volume,
                name = %object.name,
                "Object already absent from volume"
            );
        }
        self.db.remove_object(&object.volume, &object.name).await?;
        let _ = self.events.send(CacheEvent::ObjectsDeleted {
            volume: object.volume.clone(),
            ids: vec![object.id.clone()],
            freed: object.size.unwrap_or(0),
        });
        Ok(())
    }

    async fn matching_volumes(
        &self,
        prefs: CacheRoles,
    ) -> CacheResult<Vec<(VolumeEntry, VolumeRecord)>> {
        let entries = self.read_volumes().clone();
        let mut out = Vec::new();
        for entry in entries {
            let Some(record) = self.db.get_volume_info(entry.volume.name()).await? else {
                continue;
            };
            if record.info.status < VolumeStatus::Update {
                continue;
            }
            if !prefs.is_empty() && !prefs.intersects(&record.info.roles) {
                continue;
            }
            out.push((entry, record));
        }
        Ok(out)
    }

    async fn plan_deletion(
        &self,
        entry: &VolumeEntry,
        size: u64,
    ) -> CacheResult<Option<DeletionPlan>> {
        let name = entry.volume.name();
        let avail = self.available_space(name).await?;
        let target = (size as f64 * HEADROOM).round() as i64;
        if avail >= target {
            return Ok(Some(DeletionPlan {
                volume: name.to_string(),
                victims: Vec::new(),
                to_remove: 0,
                score: 0.0,
            }));
        }

        let to_remove = (target - avail) as u64;
        let shortfall = (size as i64 - avail).max(0) as f64;
        let limit = ((shortfall * SELECTION_SLACK).round() as u64).max(to_remove);
        let scorer = entry
            .scorer
            .clone()
            .unwrap_or_else(|| self.default_scorer.clone());
        let mut selection = SizeLimitedSelection::new(scorer, limit, to_remove);
        let mut victims = self.db.select_objects_from(name, &mut selection).await?;
        victims.retain(|c| c.score > 0.0);

        if selection.sufficient_size() < to_remove {
            tracing::debug!(
                volume = %name,
                needed = to_remove,
                found = selection.sufficient_size(),
                "Volume cannot free enough space"
            );
            return Ok(None);
        }

        let (mut count, mut freed, mut total_score) = (0usize, 0u64, 0.0f64);
        for victim in &victims {
            if freed >= to_remove {
                break;
            }
            count += 1;
            freed += victim.object.size.unwrap_or(0);
            total_score += victim.score;
        }
        let score = if total_score > 0.0 {
            count as f64 / total_score
        } else {
            f64::MAX
        };

        Ok(Some(DeletionPlan {
            volume: name.to_string(),
            victims,
            to_remove,
            score,
        }))
    }

    async fn execute_plan(
        &self,
        entry: &VolumeEntry,
        plan: DeletionPlan,
        size: u64,
    ) -> CacheResult<()> {
        let name = entry.volume.name();
        let status = self.db.get_volume_status(name).await?;
        if status < VolumeStatus::Update {
            return Err(CacheError::DeletionFailure(format!(
                "{name}: volume status changed to {status}"
            )));
        }

        let mut removed = 0u64;
        let mut evicted = Vec::new();
        for victim in plan.victims {
            if removed >= plan.to_remove {
                break;
            }
            let object = victim.object;
            entry.volume.remove(&object.name).await?;
            self.db.remove_object(name, &object.name).await?;
            let freed = object.size.unwrap_or(0);
            removed += freed;
            tracing::info!(
                volume = %name,
                id = %object.id,
                name = %object.name,
                size = freed,
                score = victim.score,
                "Evicted object"
            );
            evicted.push(object.id);
        }
        if !evicted.is_empty() {
            let _ = self.events.send(CacheEvent::ObjectsDeleted {
                volume: name.to_string(),
                ids: evicted,
                freed: removed,
            });
        }

        if removed < plan.to_remove {
            return Err(CacheError::DeletionFailure(format!(
                "{name}: freed {removed} of {} bytes",
                plan.to_remove
            )));
        }
        let avail = self.available_space(name).await?;
        if avail < size as i64 {
            return Err(CacheError::DeletionFailure(format!(
                "{name}: {avail} bytes available after deletion, {size} needed"
            )));
        }
        Ok(())
    }

    fn read_volumes(&self) -> std::sync::RwLockReadGuard<'_, Vec<VolumeEntry>> {
        self.volumes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_volumes(&self) -> std::sync::RwLockWriteGuard<'_, Vec<VolumeEntry>> {
        self.volumes.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("volumes", &self.volume_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_space_accounting() {
        let pending = PendingSpace::default();
        pending.add("v1", 100);
        pending.add("v1", 50);
        pending.add("v2", 7);
        assert_eq!(pending.held("v1"), 150);
        pending.release("v1", 100);
        assert_eq!(pending.held("v1"), 50);
        pending.release("v1", 500);
        assert_eq!(pending.held("v1"), 0);
        assert_eq!(pending.held("v2"), 7);
        assert_eq!(pending.held("v3"), 0);
    }
}
