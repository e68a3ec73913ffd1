//! Persisted record of integrity monitor activity.

use crate::atomic::{read_optional, write_atomic};
use crate::error::CacheResult;
use bagcache_core::timestamp::format_millis;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Contents of the monitor status file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    /// When the last cycle started (epoch ms).
    #[serde(default)]
    pub last_ran: i64,
    #[serde(default)]
    pub last_ran_date: String,
    /// When the last cycle finished checking (epoch ms).
    #[serde(default)]
    pub last_checked: i64,
    #[serde(default)]
    pub last_checked_date: String,
    /// Objects checked in the last cycle.
    #[serde(default)]
    pub filecount: u64,
    /// Ids of the objects the last cycle removed.
    #[serde(default)]
    pub deleted: Vec<String>,
    #[serde(default)]
    pub running: bool,
}

/// The status file, read and written under one lock.
pub struct StatusFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl StatusFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current status; the default if nothing has been recorded.
    pub async fn read(&self) -> CacheResult<MonitorStatus> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    /// Record the start of a cycle.
    pub async fn mark_started(&self, started: i64) -> CacheResult<MonitorStatus> {
        self.update(|s| {
            s.last_ran = started;
            s.last_ran_date = format_millis(started);
            s.running = true;
        })
        .await
    }

    /// Record the outcome of a finished cycle.
    pub async fn mark_finished(
        &self,
        finished: i64,
        filecount: u64,
        deleted: Vec<String>,
    ) -> CacheResult<MonitorStatus> {
        self.update(|s| {
            s.last_checked = finished;
            s.last_checked_date = format_millis(finished);
            s.filecount = filecount;
            s.deleted = deleted;
            s.running = false;
        })
        .await
    }

    pub async fn mark_stopped(&self) -> CacheResult<MonitorStatus> {
        self.update(|s| s.running = false).await
    }

    async fn update(&self, change: impl FnOnce(&mut MonitorStatus)) -> CacheResult<MonitorStatus> {
        let _guard = self.lock.lock().await;
        let mut status = self.load().await?;
        change(&mut status);
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_atomic(&self.path, &serde_json::to_vec_pretty(&status)?).await?;
        Ok(status)
    }

    async fn load(&self) -> CacheResult<MonitorStatus> {
        match read_optional(&self.path).await? {
            Some(text) if !text.trim().is_empty() => Ok(serde_json::from_str(&text)?),
            _ => Ok(MonitorStatus::default()),
        }
    }
}
