//! The cache manager: on-demand and whole-dataset caching, background
//! caching requests and read-only views of the cache's contents.

use crate::basic::BasicCacheManager;
use crate::cache::Cache;
use crate::error::{CacheError, CacheResult};
use crate::queue::{CachingQueue, QueueRunner, QueueStatus, RequestProcessor};
use crate::restore::DatasetRestorer;
use async_trait::async_trait;
use bagcache_core::roles::{CacheRoles, VolumeStatus};
use bagcache_core::{CacheOpts, ObjectId};
use bagcache_inventory::repos::{ObjectRepo, SummaryRepo, VolumeRepo};
use bagcache_inventory::{CacheObject, DatasetSummary, VolumeTotals, escape_like};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A volume's totals alongside its configuration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSummary {
    #[serde(flatten)]
    pub totals: VolumeTotals,
    pub capacity: u64,
    pub status: VolumeStatus,
    pub roles: Vec<&'static str>,
}

/// Caches dataset files from long-term storage into one data cache.
pub struct CacheManager {
    basic: BasicCacheManager,
    restorer: Arc<DatasetRestorer>,
    runner: QueueRunner,
}

impl CacheManager {
    pub fn new(cache: Arc<Cache>, restorer: Arc<DatasetRestorer>, queue: Arc<CachingQueue>) -> Self {
        Self {
            basic: BasicCacheManager::new(cache, restorer.clone()),
            restorer,
            runner: QueueRunner::new(queue),
        }
    }

    pub fn cache(&self) -> &Arc<Cache> {
        self.basic.cache()
    }

    pub fn restorer(&self) -> &Arc<DatasetRestorer> {
        &self.restorer
    }

    pub fn queue_runner(&self) -> &QueueRunner {
        &self.runner
    }

    /// The cached copy of a file, restoring it first if necessary.
    pub async fn get_object(&self, id: &str) -> CacheResult<CacheObject> {
        self.basic.get_object(id).await
    }

    /// Restore a file. Returns false if it was already cached and `recache`
    /// is not set.
    pub async fn cache_file(&self, id: &str, recache: bool) -> CacheResult<bool> {
        self.basic.cache_object(id, recache).await
    }

    /// Cache the files of a dataset version (the latest when `version` is
    /// `None`). Empty `prefs` leave the choice of roles to the restorer.
    pub async fn cache_dataset(
        &self,
        dsid: &str,
        version: Option<&str>,
        recache: bool,
        prefs: CacheRoles,
        target: Option<&str>,
    ) -> CacheResult<BTreeSet<String>> {
        self.restorer
            .cache_dataset(dsid, version, self.cache(), recache, prefs, target)
            .await
    }

    pub async fn is_cached(&self, id: &str) -> CacheResult<bool> {
        self.basic.is_cached(id).await
    }

    pub async fn uncache(&self, id: &str) -> CacheResult<()> {
        self.basic.uncache(id).await
    }

    /// Every cached file of a dataset, any version.
    pub async fn select_dataset_objects(
        &self,
        dsid: &str,
        min_status: VolumeStatus,
    ) -> CacheResult<Vec<CacheObject>> {
        let pattern = format!("{}/%", escape_like(dsid));
        Ok(self
            .cache()
            .inventory()
            .select_objects_like_id(&pattern, min_status)
            .await?)
    }

    /// Every cached copy of one file, any version.
    pub async fn select_file_objects(
        &self,
        dsid: &str,
        filepath: &str,
        min_status: VolumeStatus,
    ) -> CacheResult<Vec<CacheObject>> {
        let id = ObjectId::file(dsid, filepath, None).to_string();
        let db = self.cache().inventory();
        let mut out = db.find_object(&id, min_status).await?;
        let versions = format!("{}#%", escape_like(&id));
        out.extend(db.select_objects_like_id(&versions, min_status).await?);
        Ok(out)
    }

    /// The most recently cached copy of a file, if any.
    pub async fn describe_object(
        &self,
        dsid: &str,
        filepath: &str,
        min_status: VolumeStatus,
    ) -> CacheResult<Option<CacheObject>> {
        let copies = self.select_file_objects(dsid, filepath, min_status).await?;
        Ok(copies.into_iter().max_by_key(|o| o.since))
    }

    pub async fn summarize_volume(&self, name: &str) -> CacheResult<VolumeSummary> {
        let db = self.cache().inventory();
        let record = db.get_volume_info(name).await?.ok_or_else(|| {
            CacheError::Config(format!("{}: no such volume: {name}", self.cache().name()))
        })?;
        let totals = db.get_volume_totals(name).await?;
        Ok(VolumeSummary {
            totals,
            capacity: record.capacity,
            status: record.info.status,
            roles: record.info.roles.names(),
        })
    }

    pub async fn summarize_volumes(&self) -> CacheResult<Vec<VolumeSummary>> {
        let mut out = Vec::new();
        for name in self.cache().inventory().volumes().await? {
            out.push(self.summarize_volume(&name).await?);
        }
        Ok(out)
    }

    /// Per-dataset totals, optionally limited to one volume.
    pub async fn summarize_contents(&self, volume: Option<&str>) -> CacheResult<Vec<DatasetSummary>> {
        Ok(self.cache().inventory().summarize_contents(volume).await?)
    }

    pub async fn summarize_dataset(&self, dsid: &str) -> CacheResult<Option<DatasetSummary>> {
        Ok(self.cache().inventory().summarize_dataset(dsid).await?)
    }

    /// URL at which a cached copy can be fetched directly, if its volume
    /// publishes one.
    pub fn redirect_for(&self, object: &CacheObject) -> Option<String> {
        self.cache()
            .volume(&object.volume)
            .and_then(|v| v.redirect_url(&object.name))
    }

    /// Queue a file or dataset for caching in the background and make sure
    /// the worker is draining the queue.
    pub async fn queue_cache(
        self: &Arc<Self>,
        id: &str,
        recache: bool,
        seq: Option<&str>,
    ) -> CacheResult<()> {
        let opts = CacheOpts {
            recache,
            prefs: None,
            seq: seq.map(str::to_string),
        };
        self.runner.queue().enqueue(id, &opts).await?;
        tracing::debug!(id = %id, "Queued caching request");
        self.runner.ensure_running(self.clone());
        Ok(())
    }

    /// Resume draining anything left in the queue from an earlier run.
    pub async fn resume_queue(self: &Arc<Self>) -> CacheResult<bool> {
        if self.runner.queue().is_empty().await? {
            return Ok(false);
        }
        Ok(self.runner.ensure_running(self.clone()))
    }

    pub async fn caching_queue_status(&self) -> CacheResult<QueueStatus> {
        self.runner.status().await
    }
}

#[async_trait]
impl RequestProcessor for CacheManager {
    async fn process_request(&self, id: &str, opts: &CacheOpts) -> CacheResult<()> {
        let parsed = ObjectId::parse(id)?;
        if parsed.is_dataset() {
            let cached = self
                .cache_dataset(
                    &parsed.dataset,
                    parsed.version.as_deref(),
                    opts.recache,
                    opts.prefs.unwrap_or(CacheRoles::NONE),
                    opts.seq.as_deref(),
                )
                .await?;
            tracing::info!(
                dataset = %parsed.dataset,
                files = cached.len(),
                "Cached dataset from queue"
            );
        } else {
            self.cache_file(id, opts.recache).await?;
        }
        Ok(())
    }
}
