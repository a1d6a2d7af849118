//! Persistence: seen-item dedup records and run reports
//!
//! Both live in one SQLite database. Seen items are append-only (the
//! UNIQUE insert is the engine's atomic check-and-record) while run reports
//! are swept and pruned by the maintenance pass.

mod schema;
mod sqlite;

pub use schema::{initialize_schema, SCHEMA_SQL};
pub use sqlite::SqliteStore;

use thiserror::Error;

/// Errors from the storage layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("run {0} not found")]
    RunNotFound(i64),
}

/// Outcome of an atomic check-and-record insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeenOutcome {
    /// This caller recorded the fingerprint first; the item is new
    Inserted,
    /// The fingerprint was already recorded, here or by a concurrent
    /// caller; either way the item is not new
    AlreadySeen,
}

/// Terminal (or in-flight) state of a run report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    /// The run is in flight
    Running,
    /// The run walked its pages and recorded its items
    Done,
    /// The run aborted; `error_message` says why
    Failed,
    /// The run could not get its resources and was rescheduled
    Deferred,
}

impl RunStatus {
    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Done => "done",
            RunStatus::Failed => "failed",
            RunStatus::Deferred => "deferred",
        }
    }

    /// Parses a status from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "done" => Some(RunStatus::Done),
            "failed" => Some(RunStatus::Failed),
            "deferred" => Some(RunStatus::Deferred),
            _ => None,
        }
    }
}

/// Counters accumulated over one run
#[derive(Debug, Default, Clone, Copy)]
pub struct RunCounters {
    /// Pages fetched, listing and candidate pages both
    pub pages_fetched: u32,
    /// Candidate items the listing rules produced
    pub items_extracted: u32,
    /// Items that won the dedup insert
    pub items_new: u32,
    /// Page-level fetch/extract failures the run absorbed
    pub failures: u32,
}

/// One persisted run report row
#[derive(Debug, Clone)]
pub struct RunReport {
    pub id: i64,
    pub target_slug: String,
    /// RFC3339 timestamp
    pub started_at: String,
    /// RFC3339 timestamp, None while the run is in flight
    pub finished_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub pages_fetched: u32,
    pub items_extracted: u32,
    pub items_new: u32,
    pub failures: u32,
    pub status: RunStatus,
    pub error_message: Option<String>,
    /// Hash of the config the run executed under
    pub config_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_round_trip() {
        let statuses = [
            RunStatus::Running,
            RunStatus::Done,
            RunStatus::Failed,
            RunStatus::Deferred,
        ];

        for status in statuses {
            let db_string = status.to_db_string();
            let parsed = RunStatus::from_db_string(db_string);
            assert_eq!(parsed, Some(status));
        }
    }

    #[test]
    fn test_run_status_unknown_string() {
        assert_eq!(RunStatus::from_db_string("paused"), None);
        assert_eq!(RunStatus::from_db_string(""), None);
    }
}
