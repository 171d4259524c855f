//! Unattended captures on cron schedules.
//!
//! Uses tokio-cron-scheduler to call [`SnapshotJob::try_run`] whenever a
//! job's schedule matches. A firing that finds the job busy is skipped, not
//! queued, and missed firings are never replayed. Failures stay inside the
//! scheduler: they are logged and counted in [`SchedulerStats`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Local;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{SnapshotError, SnapshotResult};
use crate::job::SnapshotJob;

/// Counters for scheduled firings, across all jobs.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    fired: AtomicU64,
    completed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl SchedulerStats {
    /// Schedule matches seen.
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    /// Captures that finished successfully.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Firings dropped because the job was busy.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Captures that returned an error.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Scheduler for periodic snapshot captures.
///
/// # Example
///
/// ```ignore
/// let scheduler = SnapshotScheduler::new().await?;
/// scheduler.schedule(job.clone()).await?;
/// scheduler.start().await?;
/// ```
pub struct SnapshotScheduler {
    scheduler: JobScheduler,
    jobs: parking_lot::Mutex<Vec<(String, Uuid)>>,
    stats: Arc<SchedulerStats>,
}

impl SnapshotScheduler {
    /// Create a scheduler. Call `start()` to begin firing.
    pub async fn new() -> SnapshotResult<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SnapshotError::config(format!("Failed to create scheduler: {e}")))?;

        Ok(Self {
            scheduler,
            jobs: parking_lot::Mutex::new(Vec::new()),
            stats: Arc::new(SchedulerStats::default()),
        })
    }

    /// Bind a job's schedule. Returns `None` for manual-only jobs.
    pub async fn schedule(&self, job: Arc<SnapshotJob>) -> SnapshotResult<Option<Uuid>> {
        let Some(expression) = job.schedule().map(str::to_string) else {
            debug!(job = job.name(), "No schedule, manual captures only");
            return Ok(None);
        };

        let name = job.name().to_string();
        let stats = self.stats.clone();
        let cron_job = Job::new_async_tz(expression.as_str(), Local, move |_uuid, _lock| {
            let job = job.clone();
            let stats = stats.clone();
            Box::pin(async move {
                fire(&job, &stats).await;
            })
        })
        .map_err(|e| SnapshotError::Schedule {
            expression: expression.clone(),
            reason: e.to_string(),
        })?;

        let id = cron_job.guid();
        self.scheduler
            .add(cron_job)
            .await
            .map_err(|e| SnapshotError::Schedule {
                expression: expression.clone(),
                reason: e.to_string(),
            })?;

        info!(job = %name, schedule = %expression, "Scheduled captures");
        self.jobs.lock().push((name, id));
        Ok(Some(id))
    }

    /// Start firing.
    pub async fn start(&self) -> SnapshotResult<()> {
        self.scheduler
            .start()
            .await
            .map_err(|e| SnapshotError::config(format!("Failed to start scheduler: {e}")))?;
        info!(jobs = self.job_count(), "Snapshot scheduler started");
        Ok(())
    }

    /// Stop firing. A capture already running is left to finish.
    pub async fn shutdown(&mut self) -> SnapshotResult<()> {
        info!("Shutting down snapshot scheduler");
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| SnapshotError::config(format!("Failed to shut down scheduler: {e}")))
    }

    /// Number of jobs with a bound schedule.
    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        self.stats.clone()
    }
}

async fn fire(job: &SnapshotJob, stats: &SchedulerStats) {
    stats.fired.fetch_add(1, Ordering::Relaxed);
    debug!(job = job.name(), "Scheduled capture triggered");

    match job.try_run().await {
        Ok(Some(capture)) => {
            stats.completed.fetch_add(1, Ordering::Relaxed);
            info!(
                job = job.name(),
                commit = capture.commit.as_ref().map(|c| c.id.as_str()).unwrap_or("unchanged"),
                "Scheduled capture complete"
            );
        }
        Ok(None) => {
            stats.skipped.fetch_add(1, Ordering::Relaxed);
            warn!(job = job.name(), "Previous operation still running, skipping scheduled capture");
        }
        Err(e) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            error!(job = job.name(), error = %e, failures = stats.failed(), "Scheduled capture failed");
        }
    }
}
