//! Sequential access to zip-serialized bags.
//!
//! The zip reader is blocking and needs a seekable source, so a bag is first
//! spooled from its byte stream into an anonymous temporary file, then read on
//! the blocking pool. Entry bodies are handed back as [`ByteStream`]s fed
//! through a bounded channel; dropping a body skips the rest of that entry.

use bagcache_storage::ByteStream;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use zip::ZipArchive;
use zip::result::{ZipError, ZipResult};

const CHUNK_SIZE: usize = 64 * 1024;

/// One file entry of an archive.
pub struct ArchiveEntry {
    /// Full entry name, e.g. `mybag/data/file.csv`.
    pub name: String,
    /// Uncompressed size.
    pub size: u64,
    pub body: ByteStream,
}

impl std::fmt::Debug for ArchiveEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveEntry")
            .field("name", &self.name)
            .field("size", &self.size)
            .finish()
    }
}

/// Copy a byte stream into an unnamed temporary file, rewound to the start.
pub async fn spool(mut data: ByteStream) -> io::Result<File> {
    let file = tokio::task::spawn_blocking(tempfile::tempfile)
        .await
        .map_err(io::Error::other)??;
    let mut out = tokio::fs::File::from_std(file);
    while let Some(chunk) = data.next().await {
        out.write_all(&chunk?).await?;
    }
    out.flush().await?;
    let mut file = out.into_std().await;
    tokio::task::spawn_blocking(move || {
        use std::io::Seek;
        file.rewind().map(|_| file)
    })
    .await
    .map_err(io::Error::other)?
}

/// Stream every file entry of an archive, in archive order. Directory
/// entries are skipped.
pub fn stream_entries(file: File) -> mpsc::Receiver<ZipResult<ArchiveEntry>> {
    let (tx, rx) = mpsc::channel(1);
    tokio::task::spawn_blocking(move || {
        let mut archive = match ZipArchive::new(file) {
            Ok(a) => a,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        };
        for i in 0..archive.len() {
            let mut entry = match archive.by_index(i) {
                Ok(entry) => entry,
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    return;
                }
            };
            if entry.is_dir() {
                continue;
            }
            let (body_tx, body) = body_channel();
            let header = ArchiveEntry {
                name: entry.name().to_string(),
                size: entry.size(),
                body,
            };
            if tx.blocking_send(Ok(header)).is_err() {
                return;
            }
            pump(&mut entry, &body_tx);
        }
    });
    rx
}

/// Open a single named entry; `None` if the archive has no such entry.
pub async fn open_entry(file: File, name: &str) -> ZipResult<Option<ArchiveEntry>> {
    let name = name.to_string();
    let (found_tx, found_rx) = oneshot::channel();
    tokio::task::spawn_blocking(move || {
        let mut archive = match ZipArchive::new(file) {
            Ok(a) => a,
            Err(e) => {
                let _ = found_tx.send(Err(e));
                return;
            }
        };
        let mut entry = match archive.by_name(&name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => {
                let _ = found_tx.send(Ok(None));
                return;
            }
            Err(e) => {
                let _ = found_tx.send(Err(e));
                return;
            }
        };
        let (body_tx, body) = body_channel();
        let header = ArchiveEntry {
            name: entry.name().to_string(),
            size: entry.size(),
            body,
        };
        if found_tx.send(Ok(Some(header))).is_ok() {
            pump(&mut entry, &body_tx);
        }
    });
    found_rx
        .await
        .map_err(|_| ZipError::Io(io::Error::other("archive reader stopped")))?
}

/// Read the entries accepted by `filter` as UTF-8 text, keyed by entry name.
pub async fn read_text_entries<F>(file: File, filter: F) -> ZipResult<BTreeMap<String, String>>
where
    F: Fn(&str) -> bool + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut archive = ZipArchive::new(file)?;
        let mut out = BTreeMap::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() || !filter(entry.name()) {
                continue;
            }
            let mut text = String::new();
            entry.read_to_string(&mut text)?;
            out.insert(entry.name().to_string(), text);
        }
        Ok(out)
    })
    .await
    .map_err(|e| ZipError::Io(io::Error::other(e)))?
}

fn body_channel() -> (mpsc::Sender<io::Result<Bytes>>, ByteStream) {
    let (tx, mut rx) = mpsc::channel::<io::Result<Bytes>>(4);
    let body = async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield chunk;
        }
    };
    (tx, Box::pin(body))
}

/// Copy an entry's bytes into its body channel until done, failed, or the
/// receiver goes away.
fn pump(entry: &mut impl Read, tx: &mpsc::Sender<io::Result<Bytes>>) {
    loop {
        let mut buf = vec![0u8; CHUNK_SIZE];
        match entry.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                buf.truncate(n);
                if tx.blocking_send(Ok(Bytes::from(buf))).is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        }
    }
}
