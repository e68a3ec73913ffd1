//! Read-only aggregation views.

use crate::error::InventoryResult;
use crate::models::{DatasetSummary, VolumeTotals};
use async_trait::async_trait;

/// Repository for operational summaries. None of these take the planning lock.
#[async_trait]
pub trait SummaryRepo: Send + Sync {
    /// Count, total size, newest access and oldest check over a volume's
    /// cached objects.
    async fn get_volume_totals(&self, name: &str) -> InventoryResult<VolumeTotals>;

    /// Totals over the cached files of a dataset (ids `dsid/...`), excluding
    /// the `old` volume. `None` if nothing from the dataset is cached.
    async fn summarize_dataset(&self, dsid: &str) -> InventoryResult<Option<DatasetSummary>>;

    /// One summary per dataset with cached files, oldest check first.
    /// Without a volume name, the `old` volume is excluded.
    async fn summarize_contents(&self, volume: Option<&str>)
    -> InventoryResult<Vec<DatasetSummary>>;
}
