//! Caches, restorer, queue and monitor shared by the service and commands.

use anyhow::{Context, Result};
use bagcache_cachemgr::{
    Cache, CacheManager, CachingQueue, DatasetRestorer, HeadBagCache, IntegrityMonitor,
    MetadataCache, MonitorHandle, MonitorWorker, StatusFile, checks_from_config,
};
use bagcache_core::config::AppConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Everything built from one [`AppConfig`].
pub struct AppState {
    pub config: AppConfig,
    pub data: Arc<Cache>,
    pub head_bags: Arc<HeadBagCache>,
    pub manager: Arc<CacheManager>,
    pub monitor: Arc<MonitorHandle>,
}

impl AppState {
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let stores = bagcache_storage::long_term_from_config(&config.storage)
            .await
            .context("failed to open long-term storage")?;
        let store = stores.combined();
        tracing::info!(
            store = store.name(),
            restricted = stores.restricted.is_some(),
            "Long-term storage opened"
        );

        let head_bag_cache = Cache::from_config(&config.head_bag_cache)
            .await
            .context("failed to initialize head bag cache")?;
        let head_bags = Arc::new(HeadBagCache::new(
            head_bag_cache,
            store.clone(),
            &config.restore.ark_naan,
        ));

        let data = Cache::from_config(&config.data_cache)
            .await
            .context("failed to initialize data cache")?;
        tracing::info!(
            volumes = ?data.volume_names(),
            "Data cache initialized"
        );

        let mut restorer = match stores.restricted {
            Some(restricted) => {
                DatasetRestorer::restricted(store, restricted, head_bags.clone(), &config.restore)
            }
            None => DatasetRestorer::new(store, head_bags.clone(), &config.restore),
        };
        if let Some(dir) = &config.restore.metadata_cache_dir {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;
            let mdcache = MetadataCache::open(dir)
                .await
                .context("failed to open metadata cache")?;
            restorer = restorer.with_metadata_cache(Arc::new(mdcache));
        }

        let queue = CachingQueue::open(&config.queue.path)
            .await
            .context("failed to open caching queue")?;
        let manager = Arc::new(CacheManager::new(
            data.clone(),
            Arc::new(restorer),
            Arc::new(queue),
        ));

        let monitor = Arc::new(MonitorHandle::new(monitor_worker(
            &config, &data, &head_bags, &manager,
        )));

        Ok(Self {
            config,
            data,
            head_bags,
            manager,
            monitor,
        })
    }

    /// Spawn a task that restarts a dead continuous monitor and resumes a
    /// non-empty caching queue whose worker has exited.
    /// Returns the watchdog's JoinHandle; aborting it stops the watching.
    pub fn spawn_watchdog(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                self.check_workers().await;
            }
        })
    }

    async fn check_workers(&self) {
        let monitor = &self.config.monitor;
        if monitor.enabled && monitor.continuous && !self.monitor.is_running() {
            tracing::warn!("Integrity monitor is not running, restarting");
            self.monitor.start();
        }

        match self.manager.resume_queue().await {
            Ok(true) => tracing::info!("Caching queue worker restarted for pending requests"),
            Ok(false) => {}
            Err(e) => tracing::error!(error = %e, "Unable to inspect caching queue"),
        }
    }

    /// Interrupt the monitor and let the queue worker finish its current
    /// request.
    pub async fn shutdown(&self) {
        self.monitor.stop_and_wait().await;
        let runner = self.manager.queue_runner();
        runner.request_stop();
        runner.wait().await;
        tracing::info!("Background workers stopped");
    }
}

fn monitor_worker(
    config: &AppConfig,
    data: &Arc<Cache>,
    head_bags: &Arc<HeadBagCache>,
    manager: &Arc<CacheManager>,
) -> MonitorWorker {
    let checks = checks_from_config(&config.monitor.checks);
    let status = Arc::new(StatusFile::new(&config.monitor.status_file));
    MonitorWorker::new(
        IntegrityMonitor::new(data.clone(), checks.clone()),
        config.monitor.clone(),
        status,
    )
    .with_head_bags(IntegrityMonitor::new(head_bags.cache().clone(), checks))
    .with_recacher(manager.clone())
}
