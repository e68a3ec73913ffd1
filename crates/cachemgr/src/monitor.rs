//! Periodic integrity checking of cached objects.
//!
//! An [`IntegrityMonitor`] checks the objects of one cache, oldest check
//! first, and removes the ones that fail. A [`MonitorWorker`] drives the head
//! bag and data monitors on a duty cycle aligned to a time of day, records
//! each cycle in the [`StatusFile`] and is controlled through a
//! [`MonitorHandle`].

use crate::cache::Cache;
use crate::checks::CacheObjectCheck;
use crate::error::{CacheError, CacheResult};
use crate::manager::CacheManager;
use crate::status::{MonitorStatus, StatusFile};
use bagcache_core::config::MonitorConfig;
use bagcache_core::format_capped;
use bagcache_core::timestamp::{now_millis, start_of_day_millis};
use bagcache_inventory::CacheObject;
use bagcache_inventory::repos::ObjectRepo;
use serde::Serialize;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Errors other than failed checks tolerated in one batch.
const MAX_CHECK_ERRORS: usize = 10;

/// Outcome of checking one batch of objects.
#[derive(Debug, Default)]
pub struct CheckBatch {
    pub passed: usize,
    /// Objects that failed a check or vanished from their volume.
    pub failed: Vec<CacheObject>,
    /// Objects the checks could not judge, e.g. for lack of a recorded
    /// checksum. They are not looked at again until their grace period
    /// has passed.
    pub unverifiable: usize,
}

impl CheckBatch {
    pub fn checked(&self) -> usize {
        self.passed + self.failed.len() + self.unverifiable
    }
}

/// Checks the objects of one cache.
#[derive(Clone)]
pub struct IntegrityMonitor {
    name: String,
    cache: Arc<Cache>,
    checks: Vec<Arc<dyn CacheObjectCheck>>,
}

impl IntegrityMonitor {
    pub fn new(cache: Arc<Cache>, checks: Vec<Arc<dyn CacheObjectCheck>>) -> Self {
        Self {
            name: cache.name().to_string(),
            cache,
            checks,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// Run every check on an object and record the check time if all pass.
    pub async fn check(&self, object: &CacheObject) -> CacheResult<()> {
        let volume = self.cache.volume(&object.volume).ok_or_else(|| {
            CacheError::unverifiable(
                format!("{}:{}", object.volume, object.name),
                "volume is not attached to this cache",
            )
        })?;
        for check in &self.checks {
            check.check(object, volume.as_ref()).await?;
        }
        self.mark_checked(object).await
    }

    async fn mark_checked(&self, object: &CacheObject) -> CacheResult<()> {
        self.cache
            .inventory()
            .update_checked_time(&object.volume, &object.name, now_millis())
            .await
            .inspect_err(|e| {
                tracing::error!(
                    volume = %object.volume,
                    name = %object.name,
                    error = %e,
                    "Problem updating check status for object"
                );
            })?;
        Ok(())
    }

    /// Up to `max` objects not checked within the grace period, least
    /// recently checked first.
    pub async fn select_objects_to_be_checked(
        &self,
        max: u32,
        grace: Duration,
    ) -> CacheResult<Vec<CacheObject>> {
        let grace_ms = i64::try_from(grace.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_millis().saturating_sub(grace_ms);
        Ok(self
            .cache
            .inventory()
            .select_objects_to_check(cutoff, max)
            .await?)
    }

    /// Check a batch of objects selected for checking.
    pub async fn find_corrupted_objects(
        &self,
        max: u32,
        grace: Duration,
        delete_on_fail: bool,
    ) -> CacheResult<CheckBatch> {
        let objects = self.select_objects_to_be_checked(max, grace).await?;
        self.check_objects(objects, delete_on_fail, || false).await
    }

    /// Check `objects` in order, stopping early once `interrupted` returns
    /// true. Each object's check and removal completes before the next
    /// interruption point.
    pub async fn check_objects(
        &self,
        objects: Vec<CacheObject>,
        delete_on_fail: bool,
        interrupted: impl Fn() -> bool,
    ) -> CacheResult<CheckBatch> {
        let mut batch = CheckBatch::default();
        let mut errors = 0;
        for object in objects {
            if interrupted() {
                tracing::debug!(cache = %self.name, "Integrity check batch interrupted");
                break;
            }
            match self.check(&object).await {
                Ok(()) => batch.passed += 1,
                Err(e) if e.is_integrity() || e.is_not_found() => {
                    if e.is_not_found() {
                        tracing::warn!(
                            volume = %object.volume,
                            name = %object.name,
                            "Unable to check object as it is no longer in cache volume"
                        );
                    } else {
                        tracing::warn!(
                            volume = %object.volume,
                            name = %object.name,
                            error = %e,
                            "Cached object failed integrity check"
                        );
                    }
                    if delete_on_fail {
                        self.cache.remove_copy(&object).await?;
                    }
                    batch.failed.push(object);
                }
                Err(e) if e.is_unverifiable() => {
                    tracing::warn!(
                        volume = %object.volume,
                        name = %object.name,
                        error = %e,
                        "Unable to verify object; deferring it to a later cycle"
                    );
                    self.mark_checked(&object).await?;
                    batch.unverifiable += 1;
                }
                Err(e) => {
                    errors += 1;
                    if errors > MAX_CHECK_ERRORS {
                        return Err(CacheError::unverifiable(
                            &self.name,
                            format!("Too many check failures; latest: {e}"),
                        ));
                    }
                    tracing::error!(
                        volume = %object.volume,
                        name = %object.name,
                        error = %e,
                        "Problem accessing object during check"
                    );
                }
            }
        }
        Ok(batch)
    }
}

/// Results of one monitor cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorReport {
    pub started: i64,
    pub finished: i64,
    pub checked: u64,
    /// Ids of every object removed, head bags included.
    pub deleted: Vec<String>,
    /// True if the cycle stopped before everything due was checked.
    pub interrupted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Run,
    /// Exit once the current cycle is done.
    Finish,
    /// Exit at the next object boundary.
    Interrupt,
}

/// First cycle start at or after `now` on the grid of `duty_ms` steps
/// through `base`.
pub fn next_cycle_start(now: i64, base: i64, duty_ms: i64) -> i64 {
    if duty_ms <= 0 {
        return now;
    }
    let into = (now - base).rem_euclid(duty_ms);
    if into == 0 { now } else { now + duty_ms - into }
}

/// Scheduler state for the integrity monitors. Cloned fresh for every run
/// a [`MonitorHandle`] starts.
#[derive(Clone)]
pub struct MonitorWorker {
    head_bags: Option<IntegrityMonitor>,
    data: IntegrityMonitor,
    config: MonitorConfig,
    status: Arc<StatusFile>,
    recacher: Option<Arc<CacheManager>>,
    reports: Option<mpsc::Sender<MonitorReport>>,
}

impl MonitorWorker {
    pub fn new(data: IntegrityMonitor, config: MonitorConfig, status: Arc<StatusFile>) -> Self {
        Self {
            head_bags: None,
            data,
            config,
            status,
            recacher: None,
            reports: None,
        }
    }

    /// Also check the head bag cache, ahead of the data cache in each pass.
    pub fn with_head_bags(mut self, monitor: IntegrityMonitor) -> Self {
        self.head_bags = Some(monitor);
        self
    }

    /// Queue data files removed by a cycle for restoration when
    /// `recache_failures` is configured.
    pub fn with_recacher(mut self, manager: Arc<CacheManager>) -> Self {
        self.recacher = Some(manager);
        self
    }

    pub fn with_reports(mut self, reports: mpsc::Sender<MonitorReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn status_file(&self) -> &Arc<StatusFile> {
        &self.status
    }

    /// Run one full cycle without interruption.
    pub async fn run_cycle(&self) -> CacheResult<MonitorReport> {
        let (_tx, control) = watch::channel(Control::Run);
        self.cycle(&control).await
    }

    async fn run(self, mut control: watch::Receiver<Control>) {
        tracing::info!(
            duty_cycle_secs = self.config.duty_cycle_secs,
            continuous = self.config.continuous,
            "Integrity monitor started"
        );
        let duty_ms = i64::try_from(self.config.duty_cycle().as_millis()).unwrap_or(i64::MAX);
        let offset_ms = i64::try_from(self.config.start_offset().as_millis()).unwrap_or(0);
        let base = start_of_day_millis() + offset_ms;

        if self.config.continuous {
            let mut next = next_cycle_start(now_millis(), base, duty_ms);
            loop {
                if !sleep_until(next, &mut control).await {
                    break;
                }
                let started = now_millis();
                if let Err(e) = self.cycle(&control).await {
                    tracing::error!(error = %e, "Integrity monitor cycle halted");
                }
                if *control.borrow() != Control::Run {
                    break;
                }
                next = next_cycle_start(now_millis().max(started + 1), base, duty_ms);
            }
        } else if let Err(e) = self.cycle(&control).await {
            tracing::error!(error = %e, "Integrity monitor cycle halted");
        }

        if let Err(e) = self.status.mark_stopped().await {
            tracing::warn!(error = %e, "Unable to update monitor status file");
        }
        tracing::info!("Integrity monitor stopped");
    }

    async fn cycle(&self, control: &watch::Receiver<Control>) -> CacheResult<MonitorReport> {
        let interrupted = || *control.borrow() == Control::Interrupt;
        let mut report = MonitorReport {
            started: now_millis(),
            ..Default::default()
        };
        self.status.mark_started(report.started).await?;

        let mut requeue = Vec::new();
        let outcome = async {
            loop {
                let mut pass = 0;
                if let Some(head_bags) = &self.head_bags {
                    let batch = self.batch(head_bags, &interrupted).await?;
                    pass += batch.checked();
                    report.deleted.extend(batch.failed.into_iter().map(|o| o.id));
                }
                let batch = self.batch(&self.data, &interrupted).await?;
                pass += batch.checked();
                for object in batch.failed {
                    requeue.push(object.id.clone());
                    report.deleted.push(object.id);
                }
                report.checked += pass as u64;

                if interrupted() {
                    report.interrupted = true;
                    return Ok(());
                }
                if pass == 0 {
                    return Ok::<(), CacheError>(());
                }
            }
        }
        .await;

        report.finished = now_millis();
        if outcome.is_err() {
            report.interrupted = true;
        }
        self.status
            .mark_finished(report.finished, report.checked, report.deleted.clone())
            .await?;
        self.log_report(&report);
        self.requeue(requeue).await;
        if let Some(reports) = &self.reports {
            let _ = reports.send(report.clone()).await;
        }
        outcome.map(|_| report)
    }

    async fn batch(
        &self,
        monitor: &IntegrityMonitor,
        interrupted: &impl Fn() -> bool,
    ) -> CacheResult<CheckBatch> {
        if interrupted() {
            return Ok(CheckBatch::default());
        }
        let objects = monitor
            .select_objects_to_be_checked(self.config.batch_size, self.config.grace_period())
            .await?;
        monitor.check_objects(objects, true, interrupted).await
    }

    fn log_report(&self, report: &MonitorReport) {
        tracing::info!(
            checked = report.checked,
            deleted = report.deleted.len(),
            interrupted = report.interrupted,
            "Integrity monitor cycle complete"
        );
        if !report.deleted.is_empty() {
            let n = report.deleted.len();
            tracing::warn!(
                "Monitor deleted {n} file{} with detected integrity failures: {}",
                if n == 1 { "" } else { "s" },
                format_capped(&report.deleted)
            );
        }
    }

    async fn requeue(&self, ids: Vec<String>) {
        if !self.config.recache_failures || ids.is_empty() {
            return;
        }
        let Some(manager) = &self.recacher else {
            return;
        };
        for id in ids {
            if let Err(e) = manager.queue_cache(&id, true, None).await {
                tracing::error!(id = %id, error = %e, "Unable to queue failed object for recaching");
            }
        }
    }
}

/// Returns false if asked to stop before the deadline.
async fn sleep_until(deadline: i64, control: &mut watch::Receiver<Control>) -> bool {
    loop {
        if *control.borrow_and_update() != Control::Run {
            return false;
        }
        let wait = deadline - now_millis();
        if wait <= 0 {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(wait as u64)) => return true,
            changed = control.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
        }
    }
}

struct Running {
    task: JoinHandle<()>,
    control: watch::Sender<Control>,
}

/// Starts, stops and reports on the monitor task.
pub struct MonitorHandle {
    worker: MonitorWorker,
    running: StdMutex<Option<Running>>,
}

impl MonitorHandle {
    pub fn new(worker: MonitorWorker) -> Self {
        Self {
            worker,
            running: StdMutex::new(None),
        }
    }

    pub fn worker(&self) -> &MonitorWorker {
        &self.worker
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|r| r.as_ref().is_some_and(|r| !r.task.is_finished()))
            .unwrap_or(false)
    }

    /// Spawn a fresh monitor task unless one is alive. Returns true if a
    /// task was started.
    pub fn start(&self) -> bool {
        let Ok(mut running) = self.running.lock() else {
            return false;
        };
        if let Some(current) = running.as_ref() {
            if !current.task.is_finished() {
                return false;
            }
            tracing::debug!("Previous integrity monitor task finished; starting a new one");
        }
        let (control, rx) = watch::channel(Control::Run);
        let worker = self.worker.clone();
        *running = Some(Running {
            task: tokio::spawn(worker.run(rx)),
            control,
        });
        true
    }

    /// Ask the monitor to exit after its current cycle.
    pub fn stop_soon(&self) {
        if let Ok(running) = self.running.lock()
            && let Some(current) = running.as_ref()
        {
            let _ = current.control.send(Control::Finish);
            tracing::debug!("Monitor stop requested; will do so at next interval");
        }
    }

    /// Interrupt the monitor at the next object boundary and wait for it.
    pub async fn stop_and_wait(&self) {
        let current = self.running.lock().ok().and_then(|mut r| r.take());
        let Some(current) = current else {
            return;
        };
        let _ = current.control.send(Control::Interrupt);
        if let Err(e) = current.task.await {
            tracing::error!(error = %e, "Integrity monitor task ended abnormally");
        }
    }

    pub async fn status(&self) -> CacheResult<MonitorStatus> {
        self.worker.status.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_cycle_start() {
        let hour = 3_600_000;
        assert_eq!(next_cycle_start(10 * hour, 0, hour), 10 * hour);
        assert_eq!(next_cycle_start(10 * hour + 1, 0, hour), 11 * hour);
        // base later in the day still aligns backwards
        assert_eq!(next_cycle_start(hour + 5, 6 * hour, 2 * hour), 2 * hour);
        assert_eq!(next_cycle_start(42, 0, 0), 42);
    }

    #[test]
    fn test_batch_counts() {
        let batch = CheckBatch {
            passed: 3,
            failed: Vec::new(),
            unverifiable: 2,
        };
        assert_eq!(batch.checked(), 5);
    }
}
