//! PostgreSQL dump and restore, used as capture/restore hooks.
//!
//! The database is archived into a file inside the working tree before a
//! capture and reloaded from the checked-out file after a restore. Both tools
//! read the password from a libpq password file, which is shared with other
//! processes: an entry is appended only when the exact line is missing, and
//! the file is never rewritten.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::error::{HookError, SnapshotResult};
use crate::job::SnapshotHook;
use crate::process::Tool;

/// Connection and tool settings for the database hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    /// Database name
    pub name: String,
    pub user: String,
    pub password: String,
    /// pg_dump binary
    pub dump_command: PathBuf,
    /// pg_restore binary
    pub restore_command: PathBuf,
    /// libpq password file
    pub pgpass: PathBuf,
    /// Archive written by the dump, inside the data working tree
    pub dump_file: PathBuf,
    /// pg_dump output format
    pub format: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            name: String::new(),
            user: String::new(),
            password: String::new(),
            dump_command: PathBuf::from("pg_dump"),
            restore_command: PathBuf::from("pg_restore"),
            pgpass: PathBuf::from(".pgpass"),
            dump_file: PathBuf::new(),
            format: "custom".to_string(),
        }
    }
}

impl DatabaseSettings {
    /// The `host:port:dbname:user:password` password-file line.
    pub fn credentials_line(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.host, self.port, self.name, self.user, self.password
        )
    }
}

/// Dump and restore commands for one database
pub struct Postgres {
    settings: DatabaseSettings,
    dump: Tool,
    restore: Tool,
}

impl Postgres {
    pub fn new(settings: DatabaseSettings, timeout: Duration) -> Self {
        let dump = Tool::new(&settings.dump_command, timeout).with_env("PGPASSFILE", &settings.pgpass);
        let restore =
            Tool::new(&settings.restore_command, timeout).with_env("PGPASSFILE", &settings.pgpass);
        Self {
            settings,
            dump,
            restore,
        }
    }

    pub fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    /// Write a full archive of the database to `file`.
    pub async fn dump(&self, file: &Path) -> SnapshotResult<String> {
        self.ensure_credentials()?;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let s = &self.settings;
        let output = self
            .dump
            .run([
                format!("--file={}", file.display()),
                format!("--format={}", s.format),
                format!("--host={}", s.host),
                format!("--port={}", s.port),
                format!("--username={}", s.user),
                "--no-password".to_string(),
                s.name.clone(),
            ])
            .await?;
        trace!(output = %output.combined(), "pg_dump finished");
        Ok(output.combined())
    }

    /// Drop and recreate the database objects from `file`.
    pub async fn restore(&self, file: &Path) -> SnapshotResult<String> {
        self.ensure_credentials()?;

        let s = &self.settings;
        let output = self
            .restore
            .run([
                "--clean".to_string(),
                format!("--dbname={}", s.name),
                format!("--host={}", s.host),
                format!("--port={}", s.port),
                format!("--username={}", s.user),
                "--no-password".to_string(),
                file.display().to_string(),
            ])
            .await?;
        trace!(output = %output.combined(), "pg_restore finished");
        Ok(output.combined())
    }

    /// Make sure the password file holds this connection's entry.
    ///
    /// Returns whether a line was appended.
    pub fn ensure_credentials(&self) -> SnapshotResult<bool> {
        ensure_credentials(&self.settings.pgpass, &self.settings.credentials_line())
    }
}

/// Append `line` to the password file unless an identical line is present.
pub fn ensure_credentials(pgpass: &Path, line: &str) -> SnapshotResult<bool> {
    let existing = match std::fs::read_to_string(pgpass) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    if existing.lines().any(|l| l.trim_end() == line) {
        debug!(pgpass = %pgpass.display(), "Credentials already present");
        return Ok(false);
    }

    if let Some(parent) = pgpass.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(pgpass)?;

    let mut entry = String::new();
    if !existing.is_empty() && !existing.ends_with('\n') {
        entry.push('\n');
    }
    entry.push_str(line);
    entry.push('\n');
    file.write_all(entry.as_bytes())?;

    info!(pgpass = %pgpass.display(), "Added credentials entry");
    Ok(true)
}

/// Before-capture hook: dump the database into the working tree
pub struct DumpHook {
    db: Arc<Postgres>,
    file: PathBuf,
}

impl DumpHook {
    pub fn new(db: Arc<Postgres>, file: impl Into<PathBuf>) -> Self {
        Self {
            db,
            file: file.into(),
        }
    }
}

#[async_trait]
impl SnapshotHook for DumpHook {
    fn name(&self) -> &str {
        "database-dump"
    }

    async fn call(&self) -> Result<(), HookError> {
        info!(file = %self.file.display(), "Dumping the database");
        self.db.dump(&self.file).await?;
        Ok(())
    }
}

/// After-restore hook: reload the database from the checked-out dump
pub struct RestoreHook {
    db: Arc<Postgres>,
    file: PathBuf,
}

impl RestoreHook {
    pub fn new(db: Arc<Postgres>, file: impl Into<PathBuf>) -> Self {
        Self {
            db,
            file: file.into(),
        }
    }
}

#[async_trait]
impl SnapshotHook for RestoreHook {
    fn name(&self) -> &str {
        "database-restore"
    }

    async fn call(&self) -> Result<(), HookError> {
        info!(file = %self.file.display(), "Restoring the database");
        self.db.restore(&self.file).await?;
        Ok(())
    }
}
