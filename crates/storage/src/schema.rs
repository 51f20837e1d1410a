use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
        PRAGMA mmap_size = 268435456;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS datasets (
    dataset_id BLOB PRIMARY KEY CHECK (length(dataset_id) = 16),
    document BLOB NOT NULL,
    checksum BLOB NOT NULL CHECK (length(checksum) = 32),
    published_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER))
);

CREATE TABLE IF NOT EXISTS changes (
    rowid INTEGER PRIMARY KEY,
    dataset_id BLOB NOT NULL CHECK (length(dataset_id) = 16) REFERENCES datasets (dataset_id),
    row_label INTEGER NOT NULL,
    column_name TEXT NOT NULL,
    author_id TEXT NOT NULL,
    new_value BLOB NOT NULL,
    token BLOB NOT NULL UNIQUE CHECK (length(token) = 12),
    received_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER))
);
CREATE INDEX IF NOT EXISTS idx_changes_feed ON changes (dataset_id, token);
";
