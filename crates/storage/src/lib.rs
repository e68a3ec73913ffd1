//! Cache volumes and long-term bag storage for the bag cache.
//!
//! This crate provides:
//! - The [`CacheVolume`] abstraction with atomic, checksummed writes
//! - The [`BagStorage`] abstraction over archival bag stores
//! - Filesystem backends for both, plus a restricted-then-public fallback

pub mod backends;
pub mod error;
mod paths;
pub mod traits;

pub use backends::{
    bagstore::FilesystemBagStore, fallback::FallbackBagStorage, filesystem::FilesystemVolume,
};
pub use error::{StorageError, StorageResult, VolumeError, VolumeResult};
pub use traits::{BagStorage, ByteStream, CacheVolume, StoredObject, VolumeObjectMeta, bytes_stream};

use bagcache_core::config::{BagStoreConfig, LongTermStorageConfig, VolumeConfig};
use std::sync::Arc;

/// Open the cache volume described by a configuration entry.
pub async fn volume_from_config(config: &VolumeConfig) -> VolumeResult<Arc<dyn CacheVolume>> {
    let volume = FilesystemVolume::new(&config.name, &config.path)
        .await?
        .with_redirect_base(config.redirect_base.clone());
    Ok(Arc::new(volume))
}

/// Open a long-term bag store from configuration.
pub async fn bag_store_from_config(
    name: &str,
    config: &BagStoreConfig,
) -> StorageResult<Arc<dyn BagStorage>> {
    match config {
        BagStoreConfig::Filesystem { path } => {
            let store = FilesystemBagStore::new(name, path).await?;
            Ok(Arc::new(store))
        }
    }
}

/// The long-term stores a deployment restores from.
#[derive(Clone)]
pub struct LongTermStores {
    pub public: Arc<dyn BagStorage>,
    /// Bags of restricted-access datasets; `None` if no restricted store
    /// is configured.
    pub restricted: Option<Arc<dyn BagStorage>>,
}

impl LongTermStores {
    /// One store over everything: the restricted store with public
    /// fallback when there is one, otherwise the public store.
    pub fn combined(&self) -> Arc<dyn BagStorage> {
        match &self.restricted {
            Some(restricted) => Arc::new(FallbackBagStorage::new(
                restricted.clone(),
                self.public.clone(),
            )),
            None => self.public.clone(),
        }
    }
}

pub async fn long_term_from_config(config: &LongTermStorageConfig) -> StorageResult<LongTermStores> {
    let public = bag_store_from_config("public", &config.public).await?;
    let restricted = match &config.restricted {
        Some(cfg) => Some(bag_store_from_config("restricted", cfg).await?),
        None => None,
    };
    Ok(LongTermStores { public, restricted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::tempdir;

    #[tokio::test]
    async fn volume_from_config_creates_root() {
        let temp = tempdir().unwrap();
        let config = bagcache_core::config::CacheConfig::for_testing("data", temp.path(), 1000);
        let vol = volume_from_config(&config.volumes[0]).await.unwrap();
        assert_eq!(vol.name(), "data-vol");

        vol.save_as("hello.txt", bytes_stream(Bytes::from_static(b"hi")))
            .await
            .unwrap();
        assert!(vol.exists("hello.txt").await.unwrap());
    }

    #[tokio::test]
    async fn long_term_from_config_wraps_restricted_store() {
        let temp = tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("pub")).unwrap();
        std::fs::create_dir_all(temp.path().join("rpa")).unwrap();
        std::fs::write(temp.path().join("pub/ds1.mbag0_4-0.zip"), b"zip").unwrap();

        let config = LongTermStorageConfig {
            public: BagStoreConfig::Filesystem {
                path: temp.path().join("pub"),
            },
            restricted: Some(BagStoreConfig::Filesystem {
                path: temp.path().join("rpa"),
            }),
        };
        let stores = long_term_from_config(&config).await.unwrap();
        let restricted = stores.restricted.clone().unwrap();
        assert!(!restricted.exists("ds1.mbag0_4-0.zip").await.unwrap());

        let combined = stores.combined();
        assert_eq!(combined.name(), "restricted+public");
        assert!(combined.exists("ds1.mbag0_4-0.zip").await.unwrap());
    }

    #[tokio::test]
    async fn bag_store_from_config_rejects_missing_directory() {
        let temp = tempdir().unwrap();
        let config = BagStoreConfig::Filesystem {
            path: temp.path().join("nope"),
        };
        match bag_store_from_config("public", &config).await {
            Ok(_) => panic!("expected error"),
            Err(StorageError::Config(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
}
