//! Common test utilities and fixtures.

pub mod fixtures;

use async_trait::async_trait;
use bagcache_cachemgr::{
    Cache, CacheManager, CachingQueue, DatasetRestorer, HeadBagCache, MetadataCache,
};
use bagcache_core::config::{CacheConfig, DeletionStrategyConfig, RestoreConfig};
use bagcache_core::roles::CacheRoles;
use bagcache_storage::{
    BagStorage, ByteStream, FallbackBagStorage, FilesystemBagStore, StorageResult,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

#[allow(unused_imports)]
pub use fixtures::*;

/// Roles served by the test data volume.
pub const TEST_ROLES: CacheRoles = CacheRoles {
    general: true,
    fast: false,
    small: true,
    large: false,
    old_versions: true,
    restricted: false,
    old_restricted: false,
};

/// Deletion strategy that can evict objects of any age.
pub fn eager_strategy() -> DeletionStrategyConfig {
    DeletionStrategyConfig::Oldest {
        normal_priority: 10,
        min_age_secs: 0,
        unit_age_secs: 1,
    }
}

/// A single-volume cache configuration under `dir`.
pub fn cache_config(name: &str, dir: &Path, capacity: u64) -> CacheConfig {
    let mut config = CacheConfig::for_testing(name, dir, capacity);
    config.volumes[0].roles = TEST_ROLES;
    config.strategy = eager_strategy();
    config
}

/// Bag storage whose head bag for every dataset is fixed in advance.
pub struct PinnedHeadBag {
    inner: Arc<dyn BagStorage>,
    head: String,
}

impl PinnedHeadBag {
    pub fn new(inner: Arc<dyn BagStorage>, head: &str) -> Self {
        Self {
            inner,
            head: head.to_string(),
        }
    }
}

#[async_trait]
impl BagStorage for PinnedHeadBag {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn find_bags_for(&self, dsid: &str) -> StorageResult<Vec<String>> {
        self.inner.find_bags_for(dsid).await
    }

    async fn find_head_bag_for(
        &self,
        dsid: &str,
        _version: Option<&str>,
    ) -> StorageResult<Option<String>> {
        let bags = self.inner.find_bags_for(dsid).await?;
        Ok(bags.into_iter().find(|b| *b == self.head))
    }

    async fn open_file(&self, filename: &str) -> StorageResult<Option<ByteStream>> {
        self.inner.open_file(filename).await
    }

    async fn exists(&self, filename: &str) -> StorageResult<bool> {
        self.inner.exists(filename).await
    }

    async fn get_size(&self, filename: &str) -> StorageResult<Option<u64>> {
        self.inner.get_size(filename).await
    }

    async fn get_checksum(&self, filename: &str) -> StorageResult<Option<String>> {
        self.inner.get_checksum(filename).await
    }
}

/// A data cache, head bag cache, bag store and manager rooted in a
/// temporary directory that is removed on drop.
#[allow(dead_code)]
pub struct TestCaches {
    pub data: Arc<Cache>,
    pub head_bags: Arc<HeadBagCache>,
    pub restorer: Arc<DatasetRestorer>,
    pub manager: Arc<CacheManager>,
    pub store: Arc<dyn BagStorage>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestCaches {
    /// Build the caches over the bags already written by `setup` into the
    /// store directory.
    pub async fn new(data_capacity: u64, setup: impl FnOnce(&Path)) -> Self {
        Self::build(data_capacity, |public, _| setup(public), None, false, false).await
    }

    /// As [`TestCaches::new`], with the head bag of every dataset fixed.
    pub async fn with_head_bag(data_capacity: u64, head: &str, setup: impl FnOnce(&Path)) -> Self {
        Self::build(data_capacity, |public, _| setup(public), Some(head), false, false).await
    }

    /// As [`TestCaches::new`], recording dataset metadata on disk.
    pub async fn with_metadata_cache(data_capacity: u64, setup: impl FnOnce(&Path)) -> Self {
        Self::build(data_capacity, |public, _| setup(public), None, true, false).await
    }

    /// As [`TestCaches::new`] with a restricted store next to the public
    /// one; `setup` gets the public and restricted store directories. The
    /// data volume also takes restricted data.
    pub async fn with_restricted(data_capacity: u64, setup: impl FnOnce(&Path, &Path)) -> Self {
        Self::build(data_capacity, setup, None, false, true).await
    }

    async fn build(
        data_capacity: u64,
        setup: impl FnOnce(&Path, &Path),
        head: Option<&str>,
        mdcache: bool,
        restricted: bool,
    ) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store_dir = temp_dir.path().join("store");
        let restricted_dir = temp_dir.path().join("restricted");
        std::fs::create_dir_all(&store_dir).unwrap();
        std::fs::create_dir_all(&restricted_dir).unwrap();
        setup(&store_dir, &restricted_dir);

        let fs_store: Arc<dyn BagStorage> =
            Arc::new(FilesystemBagStore::new("public", &store_dir).await.unwrap());
        let restricted_store: Option<Arc<dyn BagStorage>> = if restricted {
            Some(Arc::new(
                FilesystemBagStore::new("restricted", &restricted_dir).await.unwrap(),
            ))
        } else {
            None
        };
        let fs_store: Arc<dyn BagStorage> = match &restricted_store {
            Some(r) => Arc::new(FallbackBagStorage::new(r.clone(), fs_store)),
            None => fs_store,
        };
        let store: Arc<dyn BagStorage> = match head {
            Some(head) => Arc::new(PinnedHeadBag::new(fs_store, head)),
            None => fs_store,
        };

        let mut data_config = cache_config("data", temp_dir.path(), data_capacity);
        data_config.volumes[0].roles.restricted = restricted;
        let data = Cache::from_config(&data_config).await.unwrap();
        let hb_cache = Cache::from_config(&cache_config("headbags", temp_dir.path(), 100_000_000))
            .await
            .unwrap();
        let head_bags = Arc::new(HeadBagCache::new(hb_cache, store.clone(), "88434"));

        let mut restorer = match restricted_store {
            Some(r) => DatasetRestorer::restricted(
                store.clone(),
                r,
                head_bags.clone(),
                &RestoreConfig::default(),
            ),
            None => DatasetRestorer::new(store.clone(), head_bags.clone(), &RestoreConfig::default()),
        };
        if mdcache {
            let dir = temp_dir.path().join("mdcache");
            std::fs::create_dir_all(&dir).unwrap();
            restorer = restorer.with_metadata_cache(Arc::new(MetadataCache::open(dir).await.unwrap()));
        }
        let restorer = Arc::new(restorer);

        let queue = Arc::new(
            CachingQueue::open(temp_dir.path().join("queue.txt"))
                .await
                .unwrap(),
        );
        let manager = Arc::new(CacheManager::new(data.clone(), restorer.clone(), queue));

        Self {
            data,
            head_bags,
            restorer,
            manager,
            store,
            _temp_dir: temp_dir,
        }
    }

    pub fn root(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Path of a stored object in the data volume.
    pub fn data_path(&self, name: &str) -> PathBuf {
        self.root().join("data-vol").join(name)
    }
}
