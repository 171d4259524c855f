//! # Larder
//!
//! Scheduled snapshots of an application's files, kept in git - a pantry of
//! earlier states to fall back on.
//!
//! This crate provides:
//! - Version stores with the repository kept apart from the files it tracks
//! - Capture and restore workflows with hooks around them
//! - A safety capture before every restore
//! - Cron-driven captures, serialized per job
//! - Read-only history listing, lookup and diffs
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                     Backups                      │
//! │  ┌───────────────────────┐ ┌──────────────────┐  │
//! │  │   SnapshotJob (data)  │ │ SnapshotJob      │  │
//! │  │  dump → stage → commit│ │   (program)      │  │
//! │  └───────────────────────┘ └──────────────────┘  │
//! │       ▲        │                    │            │
//! │       │        ▼                    ▼            │
//! │  ┌─────────┐ ┌────────────────────────────────┐  │
//! │  │Snapshot │ │          VersionStore          │  │
//! │  │Scheduler│ │  --git-dir <store> --work-tree  │  │
//! │  └─────────┘ └────────────────────────────────┘  │
//! │                     │                            │
//! │                     ▼                            │
//! │  ┌────────────────────────────────────────────┐  │
//! │  │                 History                    │  │
//! │  │   list, lookup, head, diff                 │  │
//! │  └────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use larder::{Backups, Settings, SnapshotScheduler, Stream};
//!
//! let settings = Settings::from_file("larder.toml")?;
//! let backups = Backups::open(&settings).await?;
//!
//! // Manual capture
//! let capture = backups.get(Stream::Data).run().await?;
//!
//! // Restore an earlier snapshot; the current state is captured first
//! backups.get(Stream::Data).rollback("1a2b3c4").await?;
//!
//! // Unattended captures
//! let scheduler = SnapshotScheduler::new().await?;
//! backups.schedule(&scheduler).await?;
//! scheduler.start().await?;
//! ```

pub mod backups;
pub mod commit;
pub mod config;
pub mod database;
pub mod error;
pub mod history;
pub mod job;
pub mod logging;
pub mod process;
pub mod scheduler;
pub mod store;

pub use backups::{Backups, Stream};
pub use commit::Commit;
pub use config::Settings;
pub use database::{DatabaseSettings, DumpHook, Postgres, RestoreHook};
pub use error::{HookError, SnapshotError, SnapshotResult};
pub use history::History;
pub use job::{Capture, JobConfig, JobHooks, SnapshotHook, SnapshotJob, RESTORE_VERB};
pub use process::{Tool, ToolOutput};
pub use scheduler::{SchedulerStats, SnapshotScheduler};
pub use store::{RepositoryBinding, Stage, VersionStore};
