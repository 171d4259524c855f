//! Settings for the two backup streams.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::database::DatabaseSettings;
use crate::error::{SnapshotError, SnapshotResult};
use crate::job::DEFAULT_MESSAGE;
use crate::logging::LogLevel;

/// Top-level settings, loaded once at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log: LogSettings,
    pub git: GitSettings,
    /// Application data: configuration, data directory, logs, database dump
    pub data: JobSettings,
    /// Application program files
    pub program: JobSettings,
    /// Database used by jobs with `database_hooks`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: LogLevel,
}

/// Version-control tool and store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitSettings {
    /// git binary
    pub command: PathBuf,
    /// Base directory holding one store per stream
    pub dir: PathBuf,
    /// Deadline for each tool invocation
    pub timeout_secs: u64,
    /// Commit message for captures
    pub message: String,
    /// Repository options; empty values are skipped
    pub config: BTreeMap<String, String>,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            command: PathBuf::from("git"),
            dir: PathBuf::from("backup"),
            timeout_secs: 600,
            message: DEFAULT_MESSAGE.to_string(),
            config: BTreeMap::new(),
        }
    }
}

impl GitSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// One stream's working tree, schedule and allow-list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    pub working_tree: PathBuf,
    /// Six-field cron expression; absent means manual only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    /// Paths to stage; empty means the whole working tree
    pub files: Vec<PathBuf>,
    /// Dump the database before captures and reload it after restores
    pub database_hooks: bool,
}

impl Settings {
    /// Load settings from a TOML or JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> SnapshotResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SnapshotError::config(format!("Cannot read {}: {e}", path.display()))
        })?;

        let settings: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|e| SnapshotError::config(e.to_string()))?,
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| SnapshotError::config(e.to_string()))?
            }
            _ => {
                return Err(SnapshotError::config(
                    "Unsupported config file format. Use .toml or .json",
                ))
            }
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> SnapshotResult<()> {
        if self.git.timeout_secs == 0 {
            return Err(SnapshotError::config("git.timeout_secs must be greater than zero"));
        }
        for (name, job) in [("data", &self.data), ("program", &self.program)] {
            if job.working_tree.as_os_str().is_empty() {
                return Err(SnapshotError::config(format!("{name}.working_tree is not set")));
            }
            if job.database_hooks && self.database.is_none() {
                return Err(SnapshotError::config(format!(
                    "{name}.database_hooks requires a [database] section"
                )));
            }
        }
        if let Some(db) = &self.database {
            if self.data.database_hooks || self.program.database_hooks {
                if db.name.is_empty() || db.user.is_empty() {
                    return Err(SnapshotError::config("database.name and database.user are required"));
                }
                if db.dump_file.as_os_str().is_empty() {
                    return Err(SnapshotError::config("database.dump_file is not set"));
                }
            }
        }
        Ok(())
    }
}
