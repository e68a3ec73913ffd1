//! Long-term bag storage on a local (or mounted) filesystem.

use crate::error::{StorageError, StorageResult};
use crate::paths;
use crate::traits::{BagStorage, ByteStream};
use async_trait::async_trait;
use bagcache_core::bag_name::{compare_bag_names, parse_bag_name};
use bagcache_core::hash::Checksum;
use futures::StreamExt;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::{instrument, warn};

/// Files larger than this must carry a `.sha256` sidecar.
const MAX_COMPUTED_CHECKSUM_SIZE: u64 = 50_000_000;

const CHECKSUM_SUFFIX: &str = ".sha256";

/// Bags stored as plain files in a single directory.
pub struct FilesystemBagStore {
    name: String,
    root: PathBuf,
}

impl FilesystemBagStore {
    /// Open a store over an existing directory.
    pub async fn new(name: impl Into<String>, root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        let meta = fs::metadata(&root).await.map_err(|e| {
            StorageError::Config(format!("{}: bag directory unavailable: {e}", root.display()))
        })?;
        if !meta.is_dir() {
            return Err(StorageError::Config(format!(
                "{}: not a directory",
                root.display()
            )));
        }
        Ok(Self {
            name: name.into(),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn file_meta(&self, filename: &str) -> StorageResult<Option<std::fs::Metadata>> {
        let path = paths::resolve(&self.root, filename).await?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn read_sidecar(&self, filename: &str) -> StorageResult<Option<String>> {
        let sidecar = format!("{filename}{CHECKSUM_SUFFIX}");
        let path = paths::resolve(&self.root, &sidecar).await?;
        match fs::read_to_string(&path).await {
            Ok(text) => {
                let hash = text.split_whitespace().next().unwrap_or_default();
                if hash.is_empty() {
                    return Err(StorageError::State(format!("{sidecar}: empty checksum file")));
                }
                Ok(Some(hash.to_ascii_lowercase()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::State(format!(
                "failed to read cached checksum from {sidecar}: {e}"
            ))),
        }
    }
}

#[async_trait]
impl BagStorage for FilesystemBagStore {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(backend = "filesystem", store = %self.name))]
    async fn find_bags_for(&self, dsid: &str) -> StorageResult<Vec<String>> {
        let prefix = format!("{dsid}.");
        let mut bags = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.starts_with(&prefix) || name.ends_with(CHECKSUM_SUFFIX) {
                continue;
            }
            if let Ok(parsed) = parse_bag_name(&name)
                && parsed.dataset == dsid
            {
                bags.push((parsed, name));
            }
        }
        bags.sort_by(|(p1, n1), (p2, n2)| compare_bag_names(p1, n1, p2, n2));
        Ok(bags.into_iter().map(|(_, name)| name).collect())
    }

    #[instrument(skip(self), fields(backend = "filesystem", store = %self.name))]
    async fn open_file(&self, filename: &str) -> StorageResult<Option<ByteStream>> {
        let path = paths::resolve(&self.root, filename).await?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(Some(Box::pin(ReaderStream::new(file)))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn exists(&self, filename: &str) -> StorageResult<bool> {
        Ok(self.file_meta(filename).await?.is_some())
    }

    async fn get_size(&self, filename: &str) -> StorageResult<Option<u64>> {
        Ok(self.file_meta(filename).await?.map(|m| m.len()))
    }

    #[instrument(skip(self), fields(backend = "filesystem", store = %self.name))]
    async fn get_checksum(&self, filename: &str) -> StorageResult<Option<String>> {
        let Some(meta) = self.file_meta(filename).await? else {
            return Ok(None);
        };
        if let Some(hash) = self.read_sidecar(filename).await? {
            return Ok(Some(hash));
        }

        if !filename.ends_with(CHECKSUM_SUFFIX) {
            warn!(file = filename, "no cached checksum available");
        }
        if meta.len() > MAX_COMPUTED_CHECKSUM_SIZE {
            return Err(StorageError::State(format!(
                "no cached checksum for large file: {filename}"
            )));
        }

        let Some(mut stream) = self.open_file(filename).await? else {
            return Ok(None);
        };
        let mut hasher = Checksum::hasher();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                StorageError::State(format!("unable to calculate checksum for {filename}: {e}"))
            })?;
            hasher.update(&chunk);
        }
        Ok(Some(hasher.finalize().to_hex()))
    }
}
