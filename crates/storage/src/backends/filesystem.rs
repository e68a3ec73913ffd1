//! Cache volume backed by a local directory.

use crate::error::{VolumeError, VolumeResult};
use crate::paths;
use crate::traits::{ByteStream, CacheVolume, StoredObject, VolumeObjectMeta};
use async_trait::async_trait;
use bagcache_core::hash::Checksum;
use bytes::Bytes;
use futures::StreamExt;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// A cache volume whose objects are files below a root directory.
pub struct FilesystemVolume {
    name: String,
    root: PathBuf,
    redirect_base: Option<String>,
}

impl FilesystemVolume {
    /// Open (creating if needed) a volume rooted at `root`.
    pub async fn new(name: impl Into<String>, root: impl AsRef<Path>) -> VolumeResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            name: name.into(),
            root,
            redirect_base: None,
        })
    }

    /// Serve objects by redirecting to `base` + object name.
    pub fn with_redirect_base(mut self, base: Option<String>) -> Self {
        self.redirect_base = base;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn not_found(&self, name: &str) -> VolumeError {
        VolumeError::NotFound {
            volume: self.name.clone(),
            name: name.to_string(),
        }
    }

    fn map_io(&self, name: &str, err: io::Error) -> VolumeError {
        if err.kind() == io::ErrorKind::NotFound {
            self.not_found(name)
        } else {
            VolumeError::Io(err)
        }
    }

    async fn write_temp(&self, temp: &Path, mut data: ByteStream) -> io::Result<StoredObject> {
        let mut file = fs::File::create(temp).await?;
        let mut hasher = Checksum::hasher();
        let mut size = 0u64;
        while let Some(chunk) = data.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            size += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.sync_all().await?;
        Ok(StoredObject {
            size,
            checksum: hasher.finalize(),
        })
    }
}

#[async_trait]
impl CacheVolume for FilesystemVolume {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(backend = "filesystem", volume = %self.name))]
    async fn exists(&self, name: &str) -> VolumeResult<bool> {
        let path = paths::resolve(&self.root, name).await?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(VolumeError::Io(e)),
        }
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", volume = %self.name))]
    async fn save_as(&self, name: &str, data: ByteStream) -> VolumeResult<StoredObject> {
        let path = paths::resolve(&self.root, name).await?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp = path.with_file_name(format!(
            "{}.tmp.{}",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Uuid::new_v4()
        ));

        let stored = match self.write_temp(&temp, data).await {
            Ok(stored) => stored,
            Err(source) => {
                if let Err(e) = fs::remove_file(&temp).await
                    && e.kind() != io::ErrorKind::NotFound
                {
                    warn!(temp = %temp.display(), error = %e, "failed to clean up partial write");
                }
                return Err(VolumeError::SaveFailed {
                    volume: self.name.clone(),
                    name: name.to_string(),
                    source,
                });
            }
        };
        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(VolumeError::Io(e));
        }

        debug!(size = stored.size, "saved object");
        Ok(stored)
    }

    #[instrument(skip(self), fields(backend = "filesystem", volume = %self.name))]
    async fn get_stream(&self, name: &str) -> VolumeResult<ByteStream> {
        let path = paths::resolve(&self.root, name).await?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| self.map_io(name, e))?;

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "filesystem", volume = %self.name))]
    async fn get(&self, name: &str) -> VolumeResult<Bytes> {
        let path = paths::resolve(&self.root, name).await?;
        let data = fs::read(&path).await.map_err(|e| self.map_io(name, e))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem", volume = %self.name))]
    async fn describe(&self, name: &str) -> VolumeResult<VolumeObjectMeta> {
        let path = paths::resolve(&self.root, name).await?;
        let meta = fs::metadata(&path).await.map_err(|e| self.map_io(name, e))?;
        if !meta.is_file() {
            return Err(self.not_found(name));
        }
        Ok(VolumeObjectMeta {
            size: meta.len(),
            modified: meta.modified().ok().map(Into::into),
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem", volume = %self.name))]
    async fn remove(&self, name: &str) -> VolumeResult<bool> {
        let path = paths::resolve(&self.root, name).await?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(VolumeError::Io(e)),
        }
    }

    fn redirect_url(&self, name: &str) -> Option<String> {
        self.redirect_base.as_ref().map(|base| format!("{base}{name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::bytes_stream;
    use futures::stream;

    #[tokio::test]
    async fn test_failed_stream_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let vol = FilesystemVolume::new("v", dir.path()).await.unwrap();

        let data: ByteStream = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("connection reset")),
        ]));
        let err = vol.save_as("ds/file.txt", data).await.unwrap_err();
        assert!(matches!(err, VolumeError::SaveFailed { .. }));

        assert!(!vol.exists("ds/file.txt").await.unwrap());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("ds")).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_save_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let vol = FilesystemVolume::new("v", dir.path()).await.unwrap();

        vol.save_as("a.txt", bytes_stream(Bytes::from_static(b"first version")))
            .await
            .unwrap();
        let stored = vol
            .save_as("a.txt", bytes_stream(Bytes::from_static(b"second")))
            .await
            .unwrap();
        assert_eq!(stored.size, 6);
        assert_eq!(stored.checksum, Checksum::compute(b"second"));
        assert_eq!(vol.get("a.txt").await.unwrap(), Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn test_redirect_url() {
        let dir = tempfile::tempdir().unwrap();
        let vol = FilesystemVolume::new("v", dir.path()).await.unwrap();
        assert_eq!(vol.redirect_url("x"), None);

        let vol = vol.with_redirect_base(Some("https://data.example.org/cache/".into()));
        assert_eq!(
            vol.redirect_url("ds/x.csv").as_deref(),
            Some("https://data.example.org/cache/ds/x.csv")
        );
    }
}
