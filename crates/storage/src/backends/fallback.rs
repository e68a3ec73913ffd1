//! Bag storage that consults a preferred store before a general one.

use crate::error::StorageResult;
use crate::traits::{BagStorage, ByteStream};
use async_trait::async_trait;
use bagcache_core::bag_name::find_latest_head_bag;
use std::sync::Arc;
use tracing::debug;

/// Looks in `primary` first and falls back to `secondary` for anything the
/// primary store does not have.
///
/// Restricted-access data is served this way: its bags live in a separate
/// store, while datasets that mix public and restricted files still find
/// their public bags.
pub struct FallbackBagStorage {
    name: String,
    primary: Arc<dyn BagStorage>,
    secondary: Arc<dyn BagStorage>,
}

impl FallbackBagStorage {
    pub fn new(primary: Arc<dyn BagStorage>, secondary: Arc<dyn BagStorage>) -> Self {
        let name = format!("{}+{}", primary.name(), secondary.name());
        Self {
            name,
            primary,
            secondary,
        }
    }
}

#[async_trait]
impl BagStorage for FallbackBagStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_bags_for(&self, dsid: &str) -> StorageResult<Vec<String>> {
        let bags = self.primary.find_bags_for(dsid).await?;
        if !bags.is_empty() {
            return Ok(bags);
        }
        self.secondary.find_bags_for(dsid).await
    }

    async fn find_head_bag_for(
        &self,
        dsid: &str,
        version: Option<&str>,
    ) -> StorageResult<Option<String>> {
        let first = self.primary.find_head_bag_for(dsid, version).await?;
        if version.is_some() && first.is_some() {
            return Ok(first);
        }
        debug!(dsid, store = self.secondary.name(), "consulting secondary store for head bag");
        let second = self.secondary.find_head_bag_for(dsid, version).await?;
        // without a version, the latest across both stores wins
        let found: Vec<String> = first.into_iter().chain(second).collect();
        Ok(find_latest_head_bag(&found))
    }

    async fn open_file(&self, filename: &str) -> StorageResult<Option<ByteStream>> {
        if let Some(stream) = self.primary.open_file(filename).await? {
            return Ok(Some(stream));
        }
        self.secondary.open_file(filename).await
    }

    async fn exists(&self, filename: &str) -> StorageResult<bool> {
        Ok(self.primary.exists(filename).await? || self.secondary.exists(filename).await?)
    }

    async fn get_size(&self, filename: &str) -> StorageResult<Option<u64>> {
        match self.primary.get_size(filename).await? {
            Some(size) => Ok(Some(size)),
            None => self.secondary.get_size(filename).await,
        }
    }

    async fn get_checksum(&self, filename: &str) -> StorageResult<Option<String>> {
        match self.primary.get_checksum(filename).await? {
            Some(hash) => Ok(Some(hash)),
            None => self.secondary.get_checksum(filename).await,
        }
    }
}
