//! Cache-on-demand over a single restorer.

use crate::cache::Cache;
use crate::error::{CacheError, CacheResult};
use crate::restore::Restorer;
use bagcache_inventory::CacheObject;
use bagcache_inventory::repos::ObjectRepo;
use serde_json::Map;
use std::sync::Arc;

/// A [`Cache`] paired with the [`Restorer`] that fills it.
#[derive(Clone)]
pub struct BasicCacheManager {
    cache: Arc<Cache>,
    restorer: Arc<dyn Restorer>,
}

impl BasicCacheManager {
    pub fn new(cache: Arc<Cache>, restorer: Arc<dyn Restorer>) -> Self {
        Self { cache, restorer }
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn restorer(&self) -> &Arc<dyn Restorer> {
        &self.restorer
    }

    /// Restore an object into the cache.
    ///
    /// Returns false without doing anything if the object is already cached
    /// and `recache` is not set. With `recache` existing copies are dropped
    /// and the object fetched again.
    pub async fn cache_object(&self, id: &str, recache: bool) -> CacheResult<bool> {
        if self.cache.is_cached(id).await? {
            if !recache {
                return Ok(false);
            }
            self.cache.uncache(id).await?;
        }

        let size = self
            .restorer
            .get_size_of(id)
            .await?
            .ok_or_else(|| CacheError::ObjectNotFound(id.to_string()))?;
        let prefs = self.restorer.preferences_for(id, size).await?;
        let reservation = self.cache.reserve_space(size, prefs).await?;
        let name = self.restorer.name_for_object(id, prefs);

        let mut metadata = Map::new();
        metadata.insert("size".into(), size.into());
        self.restorer
            .restore_object(id, reservation, &name, metadata)
            .await?;
        Ok(true)
    }

    /// The cached copy of an object, restoring it first if necessary.
    pub async fn get_object(&self, id: &str) -> CacheResult<CacheObject> {
        let fresh = self.cache_object(id, false).await?;
        let object = self
            .cache
            .find_object(id)
            .await?
            .ok_or_else(|| CacheError::ObjectNotFound(id.to_string()))?;
        if !fresh {
            self.cache
                .inventory()
                .update_access_time(&object.volume, &object.name)
                .await?;
        }
        Ok(object)
    }

    pub async fn is_cached(&self, id: &str) -> CacheResult<bool> {
        self.cache.is_cached(id).await
    }

    pub async fn uncache(&self, id: &str) -> CacheResult<()> {
        self.cache.uncache(id).await
    }
}
