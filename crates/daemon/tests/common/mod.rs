//! Common test utilities for the service wiring.

use bagcache_core::config::{
    AppConfig, BagStoreConfig, CacheConfig, LongTermStorageConfig, MonitorConfig, QueueConfig,
    RestoreConfig,
};
use std::path::Path;

/// A complete configuration with every path under `root`.
#[allow(dead_code)]
pub fn test_config(root: &Path, restricted: bool) -> AppConfig {
    let public = root.join("bags/public");
    std::fs::create_dir_all(&public).unwrap();
    let restricted = restricted.then(|| {
        let dir = root.join("bags/restricted");
        std::fs::create_dir_all(&dir).unwrap();
        BagStoreConfig::Filesystem { path: dir }
    });

    AppConfig {
        data_cache: CacheConfig::for_testing("data", root, 1_000_000),
        head_bag_cache: CacheConfig::for_testing("headbags", root, 1_000_000),
        storage: LongTermStorageConfig {
            public: BagStoreConfig::Filesystem { path: public },
            restricted,
        },
        restore: RestoreConfig {
            metadata_cache_dir: Some(root.join("mdcache")),
            ..Default::default()
        },
        monitor: MonitorConfig {
            duty_cycle_secs: 1,
            status_file: root.join("status/monitor.json"),
            ..Default::default()
        },
        queue: QueueConfig {
            path: root.join("queue/caching.txt"),
        },
    }
}
