//! The two backup streams and their assembly from settings

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{JobSettings, Settings};
use crate::database::{DumpHook, Postgres, RestoreHook};
use crate::error::{SnapshotError, SnapshotResult};
use crate::job::{JobConfig, JobHooks, SnapshotHook, SnapshotJob};
use crate::process::Tool;
use crate::scheduler::SnapshotScheduler;
use crate::store::{RepositoryBinding, VersionStore};

/// A named backup stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    /// Configuration, data directory, logs and database dump
    Data,
    /// Installed program files
    Program,
}

impl Stream {
    pub const ALL: [Stream; 2] = [Stream::Data, Stream::Program];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Data => "data",
            Stream::Program => "program",
        }
    }

    /// Heading for listings.
    pub fn title(&self) -> &'static str {
        match self {
            Stream::Data => "Application Data",
            Stream::Program => "Application Program",
        }
    }
}

impl std::fmt::Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stream {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data" => Ok(Stream::Data),
            "program" => Ok(Stream::Program),
            other => Err(SnapshotError::config(format!("Unknown stream {other:?}"))),
        }
    }
}

/// The data and program jobs
pub struct Backups {
    data: Arc<SnapshotJob>,
    program: Arc<SnapshotJob>,
}

impl Backups {
    /// Open both stores and build their jobs.
    pub async fn open(settings: &Settings) -> SnapshotResult<Self> {
        let base = &settings.git.dir;
        if !tokio::fs::try_exists(base).await.unwrap_or(false) {
            tokio::fs::create_dir_all(base).await?;
            info!(dir = %base.display(), "Created store base directory");
        }

        let data = Arc::new(open_job(settings, Stream::Data, &settings.data).await?);
        let program = Arc::new(open_job(settings, Stream::Program, &settings.program).await?);

        Ok(Self { data, program })
    }

    pub fn get(&self, stream: Stream) -> &Arc<SnapshotJob> {
        match stream {
            Stream::Data => &self.data,
            Stream::Program => &self.program,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stream, &Arc<SnapshotJob>)> + '_ {
        Stream::ALL.into_iter().map(move |s| (s, self.get(s)))
    }

    /// Bind every scheduled job. Returns how many were bound.
    pub async fn schedule(&self, scheduler: &SnapshotScheduler) -> SnapshotResult<usize> {
        let mut bound = 0;
        for (_, job) in self.iter() {
            if scheduler.schedule(job.clone()).await?.is_some() {
                bound += 1;
            }
        }
        Ok(bound)
    }
}

async fn open_job(settings: &Settings, stream: Stream, job: &JobSettings) -> SnapshotResult<SnapshotJob> {
    let binding = RepositoryBinding::new(settings.git.dir.join(stream.as_str()), &job.working_tree);
    let git = Tool::new(&settings.git.command, settings.git.timeout());
    let options = settings
        .git
        .config
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()));
    let store = VersionStore::open(binding, git, options).await?;

    let mut tracked = job.files.clone();
    let hooks = if job.database_hooks {
        let db = settings
            .database
            .clone()
            .ok_or_else(|| SnapshotError::config(format!("{stream}.database_hooks requires a [database] section")))?;
        let dump_file = db.dump_file.clone();
        if !tracked.is_empty() && !tracked.contains(&dump_file) {
            debug!(stream = %stream, file = %dump_file.display(), "Tracking database dump");
            tracked.push(dump_file.clone());
        }
        database_hooks(Arc::new(Postgres::new(db, settings.git.timeout())), dump_file)
    } else {
        JobHooks::none()
    };

    let mut config = JobConfig::new(stream.as_str()).with_tracked_paths(tracked);
    config.schedule = job.schedule.clone();
    config.message = settings.git.message.clone();

    info!(
        stream = %stream,
        work_tree = %job.working_tree.display(),
        schedule = config.schedule.as_deref().unwrap_or("manual"),
        "Backup stream ready"
    );
    Ok(SnapshotJob::new(config, store, hooks))
}

fn database_hooks(db: Arc<Postgres>, dump_file: PathBuf) -> JobHooks {
    let dump: Arc<dyn SnapshotHook> = Arc::new(DumpHook::new(db.clone(), dump_file.clone()));
    let restore: Arc<dyn SnapshotHook> = Arc::new(RestoreHook::new(db, dump_file));
    JobHooks {
        before_capture: Some(dump),
        after_restore: Some(restore),
    }
}
