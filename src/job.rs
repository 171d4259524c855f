//! Snapshot job - sequences capture and restore on one store

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, trace};

use crate::commit::Commit;
use crate::error::{HookError, SnapshotError, SnapshotResult};
use crate::history::History;
use crate::store::{Stage, VersionStore};

/// The only verb accepted by [`SnapshotJob::apply`].
pub const RESTORE_VERB: &str = "checkout";

/// Default commit message for captures.
pub const DEFAULT_MESSAGE: &str = "Automatic backup";

/// Side effect run around a capture or restore
///
/// Any error aborts the surrounding workflow.
#[async_trait]
pub trait SnapshotHook: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn call(&self) -> Result<(), HookError>;
}

/// Hooks attached to a job
#[derive(Clone, Default)]
pub struct JobHooks {
    /// Runs before staging, e.g. dumping a database into a tracked path
    pub before_capture: Option<Arc<dyn SnapshotHook>>,
    /// Runs after checkout, e.g. loading the checked-out dump
    pub after_restore: Option<Arc<dyn SnapshotHook>>,
}

impl JobHooks {
    pub fn none() -> Self {
        Self::default()
    }
}

/// Configuration for a snapshot job
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Job name, e.g. "data"
    pub name: String,
    /// Cron expression with seconds; `None` means manual only
    pub schedule: Option<String>,
    /// Paths to stage; empty means the whole working tree
    pub tracked_paths: Vec<PathBuf>,
    /// Commit message for captures
    pub message: String,
}

impl JobConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schedule: None,
            tracked_paths: Vec::new(),
            message: DEFAULT_MESSAGE.to_string(),
        }
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }

    pub fn with_tracked_paths(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.tracked_paths = paths.into_iter().collect();
        self
    }
}

/// Result of a capture
#[derive(Debug, Clone)]
pub struct Capture {
    /// The new snapshot, `None` when nothing had changed
    pub commit: Option<Commit>,
    /// Raw output of the commit command
    pub output: String,
}

/// A store plus the workflows that write to it
///
/// Mutating operations go through a single FIFO lane per job, so a manual
/// restore and the job's own scheduled capture never interleave. Separate
/// jobs have separate lanes and run independently.
pub struct SnapshotJob {
    name: String,
    schedule: Option<String>,
    message: String,
    store: VersionStore,
    tracked: RwLock<Vec<PathBuf>>,
    hooks: JobHooks,
    lane: Mutex<()>,
}

impl SnapshotJob {
    pub fn new(config: JobConfig, store: VersionStore, hooks: JobHooks) -> Self {
        Self {
            name: config.name,
            schedule: config.schedule,
            message: config.message,
            store,
            tracked: RwLock::new(config.tracked_paths),
            hooks,
            lane: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedule(&self) -> Option<&str> {
        self.schedule.as_deref()
    }

    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    /// Read-only projection of this job's history.
    pub fn history(&self) -> History<'_> {
        History::new(&self.store)
    }

    /// Current allow-list.
    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        self.tracked.read().clone()
    }

    /// Add a path to stage on subsequent captures.
    pub fn add_tracked_path(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        debug!(job = %self.name, path = %path.display(), "Tracking path");
        self.tracked.write().push(path);
    }

    /// Capture the tracked paths into a new snapshot.
    pub async fn run(&self) -> SnapshotResult<Capture> {
        let _lane = self.lane.lock().await;
        self.capture().await
    }

    /// Capture unless another operation holds the lane.
    pub async fn try_run(&self) -> SnapshotResult<Option<Capture>> {
        let Ok(_lane) = self.lane.try_lock() else {
            return Ok(None);
        };
        self.capture().await.map(Some)
    }

    /// Check out snapshot `id` and run the after-restore hook.
    ///
    /// Callers must have captured the current state first; [`rollback`]
    /// does both under one lane acquisition.
    ///
    /// [`rollback`]: SnapshotJob::rollback
    pub async fn restore(&self, id: &str) -> SnapshotResult<String> {
        let _lane = self.lane.lock().await;
        self.checkout(id).await
    }

    /// Capture the current state, then restore snapshot `id`.
    ///
    /// An unknown id fails before anything is captured or checked out.
    pub async fn rollback(&self, id: &str) -> SnapshotResult<String> {
        let _lane = self.lane.lock().await;
        if self.store.commit_by_id(id).await?.is_none() {
            return Err(SnapshotError::Restore(id.to_string()));
        }
        self.capture().await?;
        self.checkout(id).await
    }

    /// Entry point for restore requests carrying a verb.
    pub async fn apply(&self, verb: &str, id: &str) -> SnapshotResult<String> {
        if verb != RESTORE_VERB {
            return Err(SnapshotError::UnsupportedCommand(verb.to_string()));
        }
        self.rollback(id).await
    }

    pub async fn list(&self) -> SnapshotResult<Vec<Commit>> {
        self.history().list().await
    }

    pub async fn get(&self, id: &str) -> SnapshotResult<Option<Commit>> {
        self.history().get(id).await
    }

    pub async fn head(&self) -> SnapshotResult<Option<Commit>> {
        self.history().head().await
    }

    pub async fn diff(&self, id: &str) -> SnapshotResult<Vec<String>> {
        self.history().diff(id).await
    }

    #[cfg(test)]
    pub(crate) async fn lane_for_test(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lane.lock().await
    }

    // === Private Methods ===

    async fn capture(&self) -> SnapshotResult<Capture> {
        info!(job = %self.name, work_tree = %self.store.work_tree().display(), "Capturing snapshot");

        if let Some(hook) = &self.hooks.before_capture {
            info!(job = %self.name, hook = hook.name(), "Running before-capture hook");
            hook.call().await.map_err(|source| SnapshotError::Hook {
                stage: "before-capture",
                source,
            })?;
        }

        let previous = self.store.head().await?;

        let tracked = self.tracked_paths();
        if tracked.is_empty() {
            self.store.add(Stage::All).await?;
        } else {
            for path in &tracked {
                let relative = self.store.relative_path(path)?;
                trace!(job = %self.name, path = %relative, "Staging");
                self.store.stage_tracked(path).await?;
            }
        }

        let output = self.store.commit(&self.message).await?;
        trace!(job = %self.name, output = %output, "Commit finished");

        let head = self.store.head().await?;
        let commit = match head {
            Some(head) if previous.as_ref() != Some(&head) => {
                self.store.keep(&head).await?;
                info!(job = %self.name, commit = %head.id, "Snapshot created");
                Some(head)
            }
            _ => {
                info!(job = %self.name, "No changes since last snapshot");
                None
            }
        };

        info!(job = %self.name, "Cleaning up and optimizing store");
        self.store.gc().await;
        info!(job = %self.name, "Capture done");

        Ok(Capture { commit, output })
    }

    async fn checkout(&self, id: &str) -> SnapshotResult<String> {
        info!(job = %self.name, commit = id, "Restoring snapshot");

        let output = self.store.checkout(id).await?;
        trace!(job = %self.name, output = %output, "Checkout finished");

        if let Some(hook) = &self.hooks.after_restore {
            info!(job = %self.name, hook = hook.name(), "Running after-restore hook");
            hook.call().await.map_err(|source| SnapshotError::Hook {
                stage: "after-restore",
                source,
            })?;
        }

        info!(job = %self.name, commit = id, "Restore done");
        Ok(output)
    }
}
