//! SQLite persistence for seen items and run reports

use crate::store::schema::initialize_schema;
use crate::store::{RunCounters, RunReport, RunStatus, SeenOutcome, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// SQLite storage backend
///
/// Holds a single connection; the engine shares it across jobs behind a
/// mutex. The dedup insert relies on the `UNIQUE(target_slug, fingerprint)`
/// constraint, so concurrent processes also converge on one winner.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens or creates the database at the given path
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StoreError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    // ===== Seen Items =====

    /// Checks whether a fingerprint has not been recorded for a target
    ///
    /// Advisory only: the authoritative answer is the `record_seen` insert.
    /// Two callers may both see `true` here; only one will win the insert.
    pub fn is_new(&self, target_slug: &str, fingerprint: &str) -> Result<bool, StoreError> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM seen_items WHERE target_slug = ?1 AND fingerprint = ?2",
                params![target_slug, fingerprint],
                |row| row.get(0),
            )
            .optional()?;

        Ok(existing.is_none())
    }

    /// Atomically records a fingerprint as seen
    ///
    /// The UNIQUE constraint makes this the check-and-record step: the
    /// caller that inserts the row owns the "new item" outcome, every other
    /// caller gets `AlreadySeen`. Losing the race and finding an old row are
    /// deliberately indistinguishable.
    ///
    /// # Arguments
    ///
    /// * `target_slug` - The owning target
    /// * `fingerprint` - The item fingerprint
    /// * `url` - The item URL, kept for operator inspection
    pub fn record_seen(
        &mut self,
        target_slug: &str,
        fingerprint: &str,
        url: &str,
    ) -> Result<SeenOutcome, StoreError> {
        let now = Utc::now().to_rfc3339();
        let inserted = self.conn.execute(
            "INSERT INTO seen_items (target_slug, fingerprint, url, first_seen_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(target_slug, fingerprint) DO NOTHING",
            params![target_slug, fingerprint, url, now],
        )?;

        if inserted == 0 {
            Ok(SeenOutcome::AlreadySeen)
        } else {
            Ok(SeenOutcome::Inserted)
        }
    }

    /// Number of items recorded for a target
    pub fn count_seen(&self, target_slug: &str) -> Result<u64, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM seen_items WHERE target_slug = ?1",
            params![target_slug],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Run Reports =====

    /// Opens a run report row in the `running` state
    pub fn insert_run(
        &mut self,
        target_slug: &str,
        config_hash: &str,
        started_at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO run_reports (target_slug, started_at, status, config_hash)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                target_slug,
                started_at.to_rfc3339(),
                RunStatus::Running.to_db_string(),
                config_hash
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Closes a run report with its terminal status and counters
    pub fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        counters: RunCounters,
        duration_ms: u64,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE run_reports
             SET finished_at = ?1, duration_ms = ?2, pages_fetched = ?3, items_extracted = ?4,
                 items_new = ?5, failures = ?6, status = ?7, error_message = ?8
             WHERE id = ?9",
            params![
                now,
                duration_ms as i64,
                counters.pages_fetched,
                counters.items_extracted,
                counters.items_new,
                counters.failures,
                status.to_db_string(),
                error_message,
                run_id
            ],
        )?;
        Ok(())
    }

    /// Fetches one run report
    pub fn get_run(&self, run_id: i64) -> Result<RunReport, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM run_reports WHERE id = ?1",
            REPORT_COLUMNS
        ))?;

        stmt.query_row(params![run_id], row_to_report)
            .map_err(|_| StoreError::RunNotFound(run_id))
    }

    /// Sweeps runs that never finished: still `running` after the cutoff
    /// are closed as failed
    ///
    /// Returns the number of runs swept.
    pub fn mark_stale_runs(&mut self, started_before: DateTime<Utc>) -> Result<u64, StoreError> {
        let now = Utc::now().to_rfc3339();
        let swept = self.conn.execute(
            "UPDATE run_reports
             SET status = ?1, finished_at = ?2, error_message = 'swept: still running past the stale cutoff'
             WHERE status = ?3 AND started_at < ?4",
            params![
                RunStatus::Failed.to_db_string(),
                now,
                RunStatus::Running.to_db_string(),
                started_before.to_rfc3339()
            ],
        )?;
        Ok(swept as u64)
    }

    /// Deletes run reports older than the cutoff
    ///
    /// Returns the number of reports pruned. Seen items are never pruned;
    /// forgetting one would re-notify an old item.
    pub fn prune_runs(&mut self, started_before: DateTime<Utc>) -> Result<u64, StoreError> {
        let pruned = self.conn.execute(
            "DELETE FROM run_reports WHERE started_at < ?1 AND status != ?2",
            params![
                started_before.to_rfc3339(),
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(pruned as u64)
    }

    /// Length of the target's current streak of completed runs with zero
    /// new items, looking back at most `window` runs
    pub fn zero_new_streak(&self, target_slug: &str, window: u32) -> Result<u32, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT items_new FROM run_reports
             WHERE target_slug = ?1 AND status = ?2
             ORDER BY id DESC LIMIT ?3",
        )?;

        let counts = stmt
            .query_map(
                params![target_slug, RunStatus::Done.to_db_string(), window],
                |row| row.get::<_, u32>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut streak = 0;
        for items_new in counts {
            if items_new == 0 {
                streak += 1;
            } else {
                break;
            }
        }
        Ok(streak)
    }

    /// Most recent run reports across all targets, newest first
    pub fn recent_runs(&self, limit: u32) -> Result<Vec<RunReport>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM run_reports ORDER BY id DESC LIMIT ?1",
            REPORT_COLUMNS
        ))?;

        let reports = stmt
            .query_map(params![limit], row_to_report)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(reports)
    }

    /// Most recent run reports for one target, newest first
    pub fn runs_for_target(
        &self,
        target_slug: &str,
        limit: u32,
    ) -> Result<Vec<RunReport>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM run_reports WHERE target_slug = ?1 ORDER BY id DESC LIMIT ?2",
            REPORT_COLUMNS
        ))?;

        let reports = stmt
            .query_map(params![target_slug, limit], row_to_report)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(reports)
    }
}

const REPORT_COLUMNS: &str = "id, target_slug, started_at, finished_at, duration_ms, \
     pages_fetched, items_extracted, items_new, failures, status, error_message, config_hash";

fn row_to_report(row: &Row<'_>) -> rusqlite::Result<RunReport> {
    Ok(RunReport {
        id: row.get(0)?,
        target_slug: row.get(1)?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        duration_ms: row.get(4)?,
        pages_fetched: row.get(5)?,
        items_extracted: row.get(6)?,
        items_new: row.get(7)?,
        failures: row.get(8)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(9)?).unwrap_or(RunStatus::Running),
        error_message: row.get(10)?,
        config_hash: row.get(11)?,
    })
}
