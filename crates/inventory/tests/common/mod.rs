//! Inventory test utilities.

use bagcache_core::roles::{CacheRoles, VolumeStatus};
use bagcache_inventory::repos::VolumeRepo;
use bagcache_inventory::{InventoryDb, InventoryResult, SqliteInventory, VolumeInfo};
use serde_json::{Map, Value, json};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tempfile::TempDir;

/// A test inventory wrapper that cleans up on drop.
#[allow(dead_code)]
pub struct TestInventory {
    pub db: Arc<dyn InventoryDb>,
    sqlite: Arc<SqliteInventory>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestInventory {
    /// Create an inventory with volumes `foobar` (capacity 1000) and
    /// `fundrum` (capacity 500) registered.
    pub async fn new() -> InventoryResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let sqlite = Arc::new(SqliteInventory::new(temp_dir.path().join("inv.sqlite")).await?);

        let info = VolumeInfo {
            roles: CacheRoles::GENERAL,
            ..Default::default()
        };
        sqlite.register_volume("foobar", 1000, &info).await?;
        sqlite.register_volume("fundrum", 500, &info).await?;

        Ok(Self {
            db: sqlite.clone(),
            sqlite,
            _temp_dir: temp_dir,
        })
    }

    /// Get the SQLite connection pool for raw queries.
    pub fn pool(&self) -> &Pool<Sqlite> {
        self.sqlite.pool()
    }

    pub async fn row_count(&self) -> i64 {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM objects")
            .fetch_one(self.pool())
            .await
            .unwrap()
    }

    pub async fn set_status(&self, volume: &str, status: VolumeStatus) {
        self.db.set_volume_status(volume, status).await.unwrap();
    }
}

/// Metadata for a file of the given size.
#[allow(dead_code)]
pub fn file_md(size: u64) -> Map<String, Value> {
    let Value::Object(map) = json!({
        "size": size,
        "checksum": "deadbeef",
        "checksumAlgorithm": "sha256",
        "contentType": "text/plain",
    }) else {
        unreachable!()
    };
    map
}

/// Build a metadata map from a JSON object literal.
#[allow(dead_code)]
pub fn md(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected JSON object, got {other}"),
    }
}
