//! Snapshot error types

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for snapshot operations
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Error returned by a failing hook
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in snapshot operations
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Store directory cannot be created
    #[error("Cannot initialize store {}: {reason}", .path.display())]
    StoreInit { path: PathBuf, reason: String },

    /// Path to stage is missing or outside the working tree
    #[error("Cannot stage {}: {reason}", .path.display())]
    Staging { path: PathBuf, reason: String },

    /// A subprocess exited unsuccessfully
    #[error("`{command}` failed (exit status {}): {output}", exit_status(.status))]
    ToolInvocation {
        command: String,
        status: Option<i32>,
        output: String,
    },

    /// A subprocess did not finish in time
    #[error("`{command}` timed out after {timeout:?}")]
    ToolTimeout { command: String, timeout: Duration },

    /// Target commit is unknown
    #[error("Cannot restore unknown commit {0}")]
    Restore(String),

    /// A before-capture or after-restore hook failed
    #[error("{stage} hook failed: {source}")]
    Hook {
        stage: &'static str,
        #[source]
        source: HookError,
    },

    /// Schedule expression rejected
    #[error("Invalid schedule {expression:?}: {reason}")]
    Schedule { expression: String, reason: String },

    /// Restore requested with a verb other than checkout
    #[error("Unsupported command {0:?}, only \"checkout\" is supported")]
    UnsupportedCommand(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_status(status: &Option<i32>) -> String {
    status.map_or_else(|| "none".to_string(), |code| code.to_string())
}

impl SnapshotError {
    /// Create a staging error.
    pub fn staging(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Staging {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether the error came from an external tool (exit status or deadline).
    pub fn is_tool_failure(&self) -> bool {
        matches!(self, Self::ToolInvocation { .. } | Self::ToolTimeout { .. })
    }

    /// Captured tool output, for diagnostics.
    pub fn tool_output(&self) -> Option<&str> {
        match self {
            Self::ToolInvocation { output, .. } => Some(output),
            _ => None,
        }
    }
}
