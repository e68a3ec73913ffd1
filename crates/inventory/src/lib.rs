//! Inventory database for the bag cache.
//!
//! This crate records every object placed in a cache:
//! - Which volume holds each copy, under what name
//! - Size, checksum, priority and access/check times
//! - Volume registration, status and capacity accounting
//! - Deletion-candidate selection strategies
//! - Aggregated views for operational reporting

pub mod error;
pub mod models;
pub mod repos;
pub mod store;
pub mod strategy;

pub use error::{InventoryError, InventoryResult};
pub use models::{CacheObject, DatasetSummary, VolumeInfo, VolumeRecord, VolumeTotals};
pub use store::{InventoryDb, SqliteInventory, escape_like};
pub use strategy::{
    BigOld, BiggestFirst, DeletionScorer, OldestFirst, ScoredObject, SelectionPurpose,
    SizeLimitedSelection, scorer_from_config,
};

use bagcache_core::config::InventoryConfig;
use std::sync::Arc;

/// Create an inventory database from configuration.
pub async fn from_config(config: &InventoryConfig) -> InventoryResult<Arc<dyn InventoryDb>> {
    match config {
        InventoryConfig::Sqlite { path } => {
            let store = SqliteInventory::new(path).await?;
            Ok(Arc::new(store) as Arc<dyn InventoryDb>)
        }
    }
}
