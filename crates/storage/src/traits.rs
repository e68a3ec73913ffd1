//! Storage trait definitions.

use crate::error::{StorageResult, VolumeResult};
use async_trait::async_trait;
use bagcache_core::bag_name::{find_latest_head_bag, select_version};
use bagcache_core::hash::Checksum;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads and writes.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Wrap an in-memory buffer as a [`ByteStream`].
pub fn bytes_stream(data: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Result of writing an object into a volume.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// Number of bytes written.
    pub size: u64,
    /// SHA-256 of the bytes written.
    pub checksum: Checksum,
}

/// What a volume knows about one of its objects.
#[derive(Clone, Debug)]
pub struct VolumeObjectMeta {
    pub size: u64,
    pub modified: Option<time::OffsetDateTime>,
}

/// A named storage area holding cached objects.
///
/// Names are relative paths such as `mds2-2106/trial1.json`; a volume never
/// interprets them beyond that.
#[async_trait]
pub trait CacheVolume: Send + Sync + 'static {
    /// Name the inventory knows this volume by.
    fn name(&self) -> &str;

    async fn exists(&self, name: &str) -> VolumeResult<bool>;

    /// Write an object, replacing any existing copy.
    ///
    /// The object only becomes visible under `name` once every byte has been
    /// written and flushed. If the stream fails nothing is left behind.
    async fn save_as(&self, name: &str, data: ByteStream) -> VolumeResult<StoredObject>;

    async fn get_stream(&self, name: &str) -> VolumeResult<ByteStream>;

    /// Read a whole object into memory.
    async fn get(&self, name: &str) -> VolumeResult<Bytes>;

    async fn describe(&self, name: &str) -> VolumeResult<VolumeObjectMeta>;

    /// Delete an object; returns false if it was not there.
    async fn remove(&self, name: &str) -> VolumeResult<bool>;

    /// URL the object can be downloaded from directly, if the volume is
    /// exposed that way.
    fn redirect_url(&self, name: &str) -> Option<String>;
}

/// Long-term storage holding preservation bags.
#[async_trait]
pub trait BagStorage: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Names of all bags belonging to a dataset, in bag order. Empty if the
    /// dataset is unknown.
    async fn find_bags_for(&self, dsid: &str) -> StorageResult<Vec<String>>;

    /// Name of the head bag for a dataset, optionally for a specific version.
    async fn find_head_bag_for(
        &self,
        dsid: &str,
        version: Option<&str>,
    ) -> StorageResult<Option<String>> {
        let bags = self.find_bags_for(dsid).await?;
        let bags = match version {
            Some(v) => select_version(&bags, v),
            None => bags,
        };
        Ok(find_latest_head_bag(&bags))
    }

    /// Open a stored file for reading; `None` if it does not exist.
    async fn open_file(&self, filename: &str) -> StorageResult<Option<ByteStream>>;

    async fn exists(&self, filename: &str) -> StorageResult<bool>;

    async fn get_size(&self, filename: &str) -> StorageResult<Option<u64>>;

    /// Hex SHA-256 of a stored file; `None` if the file does not exist.
    async fn get_checksum(&self, filename: &str) -> StorageResult<Option<String>>;
}
