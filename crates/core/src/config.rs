//! Configuration types shared across crates.

use crate::roles::{CacheRoles, VolumeStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Cache holding restored data files.
    pub data_cache: CacheConfig,
    /// Cache holding head bags consulted during restoration.
    pub head_bag_cache: CacheConfig,
    /// Long-term bag storage.
    pub storage: LongTermStorageConfig,
    #[serde(default)]
    pub restore: RestoreConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

impl AppConfig {
    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        self.data_cache
            .validate()
            .map_err(|e| format!("data_cache: {e}"))?;
        self.head_bag_cache
            .validate()
            .map_err(|e| format!("head_bag_cache: {e}"))?;
        self.monitor.validate()?;
        Ok(())
    }
}

/// A cache: one inventory database plus the volumes it manages.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Name used in logs and status reports.
    pub name: String,
    /// Inventory database backend.
    #[serde(default)]
    pub inventory: InventoryConfig,
    /// Volumes managed by this cache.
    pub volumes: Vec<VolumeConfig>,
    /// Deletion strategy used for volumes that do not set their own.
    #[serde(default)]
    pub strategy: DeletionStrategyConfig,
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.volumes.is_empty() {
            return Err("at least one volume is required".to_string());
        }
        let mut seen = HashSet::new();
        for vol in &self.volumes {
            if !seen.insert(vol.name.as_str()) {
                return Err(format!("duplicate volume name: {}", vol.name));
            }
            if vol.capacity == 0 {
                return Err(format!("volume {} has zero capacity", vol.name));
            }
        }
        Ok(())
    }

    /// A single-volume cache rooted at `dir`, for tests.
    pub fn for_testing(name: &str, dir: &std::path::Path, capacity: u64) -> Self {
        Self {
            name: name.to_string(),
            inventory: InventoryConfig::Sqlite {
                path: dir.join(format!("{name}.sqlite")),
            },
            volumes: vec![VolumeConfig {
                name: format!("{name}-vol"),
                path: dir.join(format!("{name}-vol")),
                capacity,
                status: VolumeStatus::Update,
                roles: CacheRoles::GENERAL,
                priority: default_volume_priority(),
                redirect_base: None,
                strategy: None,
            }],
            strategy: DeletionStrategyConfig::default(),
        }
    }
}

/// A cache volume.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub name: String,
    /// Root directory for the volume's files.
    pub path: PathBuf,
    /// Capacity in bytes.
    pub capacity: u64,
    #[serde(default)]
    pub status: VolumeStatus,
    /// Roles served by the volume (default: general).
    #[serde(default = "default_volume_roles")]
    pub roles: CacheRoles,
    #[serde(default = "default_volume_priority")]
    pub priority: i32,
    /// Base URL under which the volume's files are served directly, if any.
    #[serde(default)]
    pub redirect_base: Option<String>,
    /// Overrides the cache-wide deletion strategy.
    #[serde(default)]
    pub strategy: Option<DeletionStrategyConfig>,
}

fn default_volume_roles() -> CacheRoles {
    CacheRoles::GENERAL
}

fn default_volume_priority() -> i32 {
    10
}

/// Inventory database configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InventoryConfig {
    /// SQLite database file.
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/inventory.sqlite"),
        }
    }
}

/// How victims are chosen when a volume must free space.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeletionStrategyConfig {
    /// Oldest objects first, weighted by priority.
    Oldest {
        #[serde(default = "default_normal_priority")]
        normal_priority: i32,
        /// Objects younger than this are never selected.
        #[serde(default = "default_min_age_secs")]
        min_age_secs: u64,
        #[serde(default = "default_unit_age_secs")]
        unit_age_secs: u64,
    },
    /// Biggest objects first.
    Size {
        #[serde(default = "default_size_norm")]
        norm: f64,
    },
    /// Balances age against size around two turnover constants.
    Bigold {
        #[serde(default = "default_age_turnover_secs")]
        age_turnover_secs: u64,
        #[serde(default = "default_size_norm")]
        size_turnover: f64,
    },
}

fn default_normal_priority() -> i32 {
    10
}

fn default_min_age_secs() -> u64 {
    3600 // 1 hour
}

fn default_unit_age_secs() -> u64 {
    86400 // 1 day
}

fn default_size_norm() -> f64 {
    5.0e8
}

fn default_age_turnover_secs() -> u64 {
    9000 // 2.5 hours
}

impl Default for DeletionStrategyConfig {
    fn default() -> Self {
        Self::Oldest {
            normal_priority: default_normal_priority(),
            min_age_secs: default_min_age_secs(),
            unit_age_secs: default_unit_age_secs(),
        }
    }
}

/// Long-term storage holding the preservation bags.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LongTermStorageConfig {
    /// Publicly accessible bags.
    pub public: BagStoreConfig,
    /// Restricted bags, consulted before the public store when set.
    #[serde(default)]
    pub restricted: Option<BagStoreConfig>,
}

/// A bag store backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BagStoreConfig {
    /// Bags stored as files in a directory.
    Filesystem { path: PathBuf },
}

/// Restoration tunables.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Files at or below this size prefer volumes with the small role.
    #[serde(default = "default_small_size_limit")]
    pub small_size_limit: u64,
    /// Lifetime of restricted files in the cache.
    #[serde(default = "default_restricted_expiry_secs")]
    pub restricted_expiry_secs: u64,
    /// Directory of the on-disk metadata cache; disabled when unset.
    #[serde(default)]
    pub metadata_cache_dir: Option<PathBuf>,
    /// Name-assigning authority used to form ARK identifiers for datasets
    /// named by their local id.
    #[serde(default = "default_ark_naan")]
    pub ark_naan: String,
}

fn default_small_size_limit() -> u64 {
    100_000_000 // 100 MB
}

fn default_restricted_expiry_secs() -> u64 {
    14 * 86400 // 2 weeks
}

fn default_ark_naan() -> String {
    "88434".to_string()
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            small_size_limit: default_small_size_limit(),
            restricted_expiry_secs: default_restricted_expiry_secs(),
            metadata_cache_dir: None,
            ark_naan: default_ark_naan(),
        }
    }
}

impl RestoreConfig {
    pub fn restricted_expiry(&self) -> Duration {
        Duration::from_secs(self.restricted_expiry_secs)
    }
}

/// Integrity monitor scheduling.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Start the monitor with the service.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Time between the starts of consecutive cycles.
    #[serde(default = "default_duty_cycle_secs")]
    pub duty_cycle_secs: u64,
    /// Objects checked more recently than this are skipped.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    /// Offset from UTC midnight that cycle starts are aligned to.
    #[serde(default)]
    pub start_offset_secs: u64,
    /// Objects selected per batch from each cache.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Keep cycling; when false the monitor runs a single cycle.
    #[serde(default = "default_true")]
    pub continuous: bool,
    /// Queue objects that failed a check to be restored again.
    #[serde(default)]
    pub recache_failures: bool,
    /// Where cycle results are recorded.
    #[serde(default = "default_status_file")]
    pub status_file: PathBuf,
    /// Checks applied to each object.
    #[serde(default = "default_checks")]
    pub checks: Vec<CheckConfig>,
}

fn default_true() -> bool {
    true
}

fn default_duty_cycle_secs() -> u64 {
    30 * 60 // 30 minutes
}

fn default_grace_period_secs() -> u64 {
    24 * 3600 // 24 hours
}

fn default_batch_size() -> u32 {
    100
}

fn default_status_file() -> PathBuf {
    PathBuf::from("./data/monitor-status.json")
}

fn default_checks() -> Vec<CheckConfig> {
    vec![CheckConfig::Checksum]
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duty_cycle_secs: default_duty_cycle_secs(),
            grace_period_secs: default_grace_period_secs(),
            start_offset_secs: 0,
            batch_size: default_batch_size(),
            continuous: true,
            recache_failures: false,
            status_file: default_status_file(),
            checks: default_checks(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("monitor.batch_size must be positive".to_string());
        }
        if self.start_offset_secs >= 86400 {
            return Err("monitor.start_offset_secs must be less than a day".to_string());
        }
        Ok(())
    }

    pub fn duty_cycle(&self) -> Duration {
        Duration::from_secs(self.duty_cycle_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn start_offset(&self) -> Duration {
        Duration::from_secs(self.start_offset_secs)
    }
}

/// An integrity check applied by the monitor.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CheckConfig {
    /// Recompute and compare the SHA-256 checksum.
    Checksum,
    /// Compare the stored size with the recorded one.
    Size,
    /// Fail objects past their expiry.
    Expiry {
        #[serde(default = "default_restricted_expiry_secs")]
        ttl_secs: u64,
    },
}

/// Caching queue persistence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_path")]
    pub path: PathBuf,
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("./data/caching-queue.txt")
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: default_queue_path(),
        }
    }
}
