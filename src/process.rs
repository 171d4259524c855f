//! Bounded-time invocation of external tools.
//!
//! Every external command (git, pg_dump, pg_restore) goes through [`Tool`]:
//! the child is awaited under a deadline and killed if the deadline expires,
//! so a hung tool fails the operation instead of stalling its job forever.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tracing::trace;

use crate::error::{SnapshotError, SnapshotResult};

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Exit code, `None` when terminated by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Whether the process exited with status 0.
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stdout followed by stderr, trimmed.
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, _) => stderr.to_string(),
            (false, true) => stdout.to_string(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }
}

/// An external program invoked with a per-call deadline.
#[derive(Debug, Clone)]
pub struct Tool {
    program: PathBuf,
    timeout: Duration,
    envs: Vec<(OsString, OsString)>,
    current_dir: Option<PathBuf>,
}

impl Tool {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            envs: Vec::new(),
            current_dir: None,
        }
    }

    /// Set an environment variable for every invocation.
    pub fn with_env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Run every invocation from `dir`.
    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the tool and capture its output whatever the exit status.
    pub async fn output<I, S>(&self, args: I) -> SnapshotResult<ToolOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<OsString> = args
            .into_iter()
            .map(|a| a.as_ref().to_os_string())
            .collect();
        let display_line = self.display(&args);

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        trace!(command = %display_line, "Invoking tool");

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result.map_err(|e| SnapshotError::ToolInvocation {
                command: display_line.clone(),
                status: None,
                output: e.to_string(),
            })?,
            Err(_) => {
                return Err(SnapshotError::ToolTimeout {
                    command: display_line,
                    timeout: self.timeout,
                })
            }
        };

        Ok(ToolOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Run the tool, failing on a non-zero exit status.
    pub async fn run<I, S>(&self, args: I) -> SnapshotResult<ToolOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<OsString> = args
            .into_iter()
            .map(|a| a.as_ref().to_os_string())
            .collect();
        let output = self.output(&args).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(SnapshotError::ToolInvocation {
                command: self.display(&args),
                status: output.status,
                output: output.combined(),
            })
        }
    }

    /// Check the binary can be launched at all.
    pub async fn probe(&self) -> SnapshotResult<String> {
        let output = self.run(["--version"]).await?;
        Ok(output.combined())
    }

    fn display(&self, args: &[OsString]) -> String {
        let mut line = self.program.display().to_string();
        for arg in args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}
