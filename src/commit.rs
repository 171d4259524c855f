//! Commit model parsed from the store's log output

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Format string passed to `rev-list --format`, one date line per commit.
pub(crate) const LOG_FORMAT: &str = "--format=%ci";

const HEADER_PREFIX: &str = "commit ";
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// A snapshot recorded in the store
///
/// Only ever produced by parsing store output; the store remains the source
/// of truth and commits are never cached between queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Abbreviated object id
    pub id: String,
    /// Commit date
    pub timestamp: DateTime<FixedOffset>,
}

impl Commit {
    /// Date at minute precision, as shown in listings.
    pub fn summary(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M").to_string()
    }
}

impl std::fmt::Display for Commit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.id, self.summary())
    }
}

/// Parse `rev-list --abbrev-commit --format=%ci` output.
///
/// Entries alternate a `commit <id>` header with a date line. Parsing stops
/// at the first header or date that does not fit, so truncated or garbled
/// output yields the well-formed prefix.
pub(crate) fn parse_log(output: &str) -> Vec<Commit> {
    let mut commits = Vec::new();
    let mut lines = output.lines();

    while let Some(header) = lines.next() {
        let Some(id) = header.strip_prefix(HEADER_PREFIX) else {
            break;
        };
        let id = id.trim();
        if id.is_empty() {
            break;
        }
        let Some(date) = lines.next() else {
            break;
        };
        let Ok(timestamp) = DateTime::parse_from_str(date.trim(), DATE_FORMAT) else {
            break;
        };
        commits.push(Commit {
            id: id.to_string(),
            timestamp,
        });
    }

    commits
}
