//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Vedette database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Items already delivered, one row per (target, fingerprint)
CREATE TABLE IF NOT EXISTS seen_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target_slug TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    url TEXT NOT NULL,
    first_seen_at TEXT NOT NULL,
    UNIQUE(target_slug, fingerprint)
);

CREATE INDEX IF NOT EXISTS idx_seen_items_target ON seen_items(target_slug);

-- One row per crawl run
CREATE TABLE IF NOT EXISTS run_reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target_slug TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    duration_ms INTEGER,
    pages_fetched INTEGER NOT NULL DEFAULT 0,
    items_extracted INTEGER NOT NULL DEFAULT 0,
    items_new INTEGER NOT NULL DEFAULT 0,
    failures INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    error_message TEXT,
    config_hash TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_run_reports_target ON run_reports(target_slug);
CREATE INDEX IF NOT EXISTS idx_run_reports_started ON run_reports(started_at);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_initializes() {
        let conn = Connection::open_in_memory().unwrap();
        let result = initialize_schema(&conn);
        assert!(result.is_ok());
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        // Initialize twice
        initialize_schema(&conn).unwrap();
        let result = initialize_schema(&conn);

        // Should succeed the second time too
        assert!(result.is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in ["seen_items", "run_reports"] {
            let count: i64 = conn
                .query_row(
                    &format!(
                        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='{}'",
                        table
                    ),
                    [],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_seen_items_unique_per_target() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO seen_items (target_slug, fingerprint, url, first_seen_at)
             VALUES ('jobs', 'abc', 'https://example.com/1', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        // Same fingerprint under the same target violates the constraint
        let duplicate = conn.execute(
            "INSERT INTO seen_items (target_slug, fingerprint, url, first_seen_at)
             VALUES ('jobs', 'abc', 'https://example.com/1', '2026-01-01T00:00:01Z')",
            [],
        );
        assert!(duplicate.is_err());

        // Same fingerprint under another target is a different item
        let other_target = conn.execute(
            "INSERT INTO seen_items (target_slug, fingerprint, url, first_seen_at)
             VALUES ('news', 'abc', 'https://example.com/1', '2026-01-01T00:00:02Z')",
            [],
        );
        assert!(other_target.is_ok());
    }
}
