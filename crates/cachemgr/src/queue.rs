//! Persistent FIFO of caching requests and the worker that drains it.
//!
//! The queue file holds one request per line, `id<TAB>options`. Appends go
//! straight to the end of the file; removals rewrite it through a temp file.

use crate::atomic::{read_optional, write_atomic};
use crate::error::CacheResult;
use async_trait::async_trait;
use bagcache_core::error::format_capped;
use bagcache_core::opts::CacheOpts;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// A file-backed FIFO of caching requests.
pub struct CachingQueue {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CachingQueue {
    /// Open the queue stored at `path`, creating an empty one if needed.
    pub async fn open(path: impl Into<PathBuf>) -> CacheResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a request.
    pub async fn enqueue(&self, id: &str, opts: &CacheOpts) -> CacheResult<()> {
        if id.is_empty() || id.contains(['\t', '\n', '\r']) {
            return Err(bagcache_core::Error::InvalidId(id.to_string()).into());
        }
        let _guard = self.lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{id}\t{}\n", opts.serialize()).as_bytes())
            .await?;
        file.flush().await?;
        Ok(())
    }

    /// All queued lines, oldest first.
    pub async fn entries(&self) -> CacheResult<Vec<String>> {
        let _guard = self.lock.lock().await;
        self.read_lines().await
    }

    pub async fn len(&self) -> CacheResult<usize> {
        Ok(self.entries().await?.len())
    }

    pub async fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// The oldest line, left in place.
    pub async fn peek(&self) -> CacheResult<Option<String>> {
        Ok(self.entries().await?.into_iter().next())
    }

    /// Remove and return the oldest line.
    pub async fn pop(&self) -> CacheResult<Option<String>> {
        let _guard = self.lock.lock().await;
        let mut lines = self.read_lines().await?;
        if lines.is_empty() {
            return Ok(None);
        }
        let first = lines.remove(0);
        self.write_lines(&lines).await?;
        Ok(Some(first))
    }

    /// Remove the first occurrence of `line`; false if it was not queued.
    pub async fn remove_first(&self, line: &str) -> CacheResult<bool> {
        let _guard = self.lock.lock().await;
        let mut lines = self.read_lines().await?;
        let Some(pos) = lines.iter().position(|l| l == line) else {
            return Ok(false);
        };
        lines.remove(pos);
        self.write_lines(&lines).await?;
        Ok(true)
    }

    /// True if a request for exactly `id` is waiting.
    pub async fn is_queued(&self, id: &str) -> CacheResult<bool> {
        Ok(self
            .entries()
            .await?
            .iter()
            .any(|line| line.split('\t').next() == Some(id)))
    }

    async fn read_lines(&self) -> CacheResult<Vec<String>> {
        Ok(read_optional(&self.path)
            .await?
            .unwrap_or_default()
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn write_lines(&self, lines: &[String]) -> CacheResult<()> {
        let mut text = lines.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        write_atomic(&self.path, text.as_bytes()).await?;
        Ok(())
    }
}

/// Split a queue line into its id and options.
pub fn parse_line(line: &str) -> CacheResult<(String, CacheOpts)> {
    let (id, opts) = match line.split_once('\t') {
        Some((id, opts)) => (id.trim(), Some(opts)),
        None => (line.trim(), None),
    };
    if id.is_empty() {
        return Err(bagcache_core::Error::InvalidId(line.to_string()).into());
    }
    Ok((id.to_string(), CacheOpts::parse(opts)?))
}

/// Carries out one dequeued caching request.
#[async_trait]
pub trait RequestProcessor: Send + Sync + 'static {
    async fn process_request(&self, id: &str, opts: &CacheOpts) -> CacheResult<()>;
}

/// Snapshot of the queue and its worker.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QueueStatus {
    pub queued: usize,
    pub running: bool,
    pub current: Option<String>,
}

/// Runs the drain task for a [`CachingQueue`].
///
/// The task exits once the queue is empty; [`QueueRunner::ensure_running`]
/// starts a fresh one when work arrives and none is active. At most one
/// task holds the `active` flag; a task gives it up before exiting and
/// takes it back if a request was queued in the meantime.
pub struct QueueRunner {
    queue: Arc<CachingQueue>,
    task: StdMutex<Option<JoinHandle<()>>>,
    current: Arc<StdMutex<Option<String>>>,
    stop: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
}

impl QueueRunner {
    pub fn new(queue: Arc<CachingQueue>) -> Self {
        Self {
            queue,
            task: StdMutex::new(None),
            current: Arc::new(StdMutex::new(None)),
            stop: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn queue(&self) -> &Arc<CachingQueue> {
        &self.queue
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Start a drain task unless one is already active. Returns true if a
    /// new task was spawned.
    pub fn ensure_running(&self, processor: Arc<dyn RequestProcessor>) -> bool {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.stop.store(false, Ordering::SeqCst);
        let worker = DrainWorker {
            queue: self.queue.clone(),
            processor,
            current: self.current.clone(),
            stop: self.stop.clone(),
            active: self.active.clone(),
        };
        let handle = tokio::spawn(worker.run());
        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }
        true
    }

    /// Ask the drain task to exit before its next request.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Wait for the current drain task, if any, to finish.
    pub async fn wait(&self) {
        let handle = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::error!(error = %e, "Caching queue worker ended abnormally");
        }
    }

    pub async fn status(&self) -> CacheResult<QueueStatus> {
        Ok(QueueStatus {
            queued: self.queue.len().await?,
            running: self.is_running(),
            current: self.current.lock().ok().and_then(|c| c.clone()),
        })
    }
}

struct DrainWorker {
    queue: Arc<CachingQueue>,
    processor: Arc<dyn RequestProcessor>,
    current: Arc<StdMutex<Option<String>>>,
    stop: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
}

impl DrainWorker {
    async fn run(self) {
        tracing::info!(queue = %self.queue.path().display(), "Caching queue worker started");
        loop {
            if self.stop.load(Ordering::SeqCst) {
                tracing::info!("Caching queue worker stopping on request");
                self.release();
                break;
            }
            let line = match self.queue.peek().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    if self.reclaim_if_queued().await {
                        continue;
                    }
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Unable to read caching queue; worker exiting");
                    self.release();
                    return;
                }
            };

            match parse_line(&line) {
                Ok((id, opts)) => {
                    if !self.process(id, opts).await {
                        self.release();
                        self.log_pending().await;
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(line = %line, error = %e, "Dropping malformed caching queue entry");
                }
            }

            if let Err(e) = self.queue.remove_first(&line).await {
                tracing::error!(error = %e, "Unable to update caching queue; worker exiting");
                self.release();
                self.log_pending().await;
                return;
            }
        }
        tracing::info!("Caching queue worker finished");
    }

    fn release(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Give up the active flag on finding the queue empty, then take it
    /// back if a request arrived in between. False means exit: the queue
    /// is empty, or a newer worker has taken over.
    async fn reclaim_if_queued(&self) -> bool {
        self.release();
        match self.queue.is_empty().await {
            Ok(false) => self
                .active
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok(),
            _ => false,
        }
    }

    /// Run one request in its own task so a panic is contained. Returns
    /// false if the worker must exit.
    async fn process(&self, id: String, opts: CacheOpts) -> bool {
        self.set_current(Some(id.clone()));
        let processor = self.processor.clone();
        let task_id = id.clone();
        let handle =
            tokio::spawn(async move { processor.process_request(&task_id, &opts).await });
        let result = handle.await;
        self.set_current(None);

        match result {
            Ok(Ok(())) => {
                tracing::info!(id = %id, "Processed caching request");
                true
            }
            Ok(Err(e)) => {
                tracing::error!(id = %id, error = %e, "Failed to process caching request");
                true
            }
            Err(join_err) if join_err.is_panic() => {
                tracing::error!(id = %id, panic = ?join_err, "Caching request panicked; worker exiting");
                false
            }
            Err(join_err) => {
                tracing::error!(id = %id, error = ?join_err, "Caching request was cancelled; worker exiting");
                false
            }
        }
    }

    fn set_current(&self, id: Option<String>) {
        if let Ok(mut current) = self.current.lock() {
            *current = id;
        }
    }

    async fn log_pending(&self) {
        match self.queue.entries().await {
            Ok(pending) if !pending.is_empty() => {
                let ids: Vec<&str> = pending
                    .iter()
                    .filter_map(|l| l.split('\t').next())
                    .collect();
                tracing::warn!(
                    count = ids.len(),
                    "Caching queue has unprocessed requests: {}",
                    format_capped(&ids)
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Unable to list unprocessed caching requests"),
        }
    }
}
