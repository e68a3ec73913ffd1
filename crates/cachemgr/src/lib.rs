//! Cache management for dataset files restored from preservation bags.
//!
//! This crate provides:
//! - Space management over cache volumes, with eviction planning
//! - Restoration of files and whole datasets from multibag archives
//! - The cache manager and its background caching queue
//! - Integrity checks and the periodic integrity monitor

mod atomic;
pub mod basic;
pub mod cache;
pub mod checks;
pub mod error;
pub mod manager;
pub mod metadata_cache;
pub mod monitor;
pub mod queue;
pub mod reservation;
pub mod restore;
pub mod status;

pub use basic::BasicCacheManager;
pub use cache::{Cache, CacheEvent};
pub use checks::{CacheObjectCheck, ChecksumCheck, ExpiryCheck, SizeCheck, checks_from_config};
pub use error::{CacheError, CacheResult};
pub use manager::{CacheManager, VolumeSummary};
pub use metadata_cache::MetadataCache;
pub use monitor::{CheckBatch, IntegrityMonitor, MonitorHandle, MonitorReport, MonitorWorker};
pub use queue::{CachingQueue, QueueRunner, QueueStatus, RequestProcessor};
pub use reservation::Reservation;
pub use restore::{BagRestorer, DatasetRestorer, HeadBagCache, Restorer};
pub use status::{MonitorStatus, StatusFile};
