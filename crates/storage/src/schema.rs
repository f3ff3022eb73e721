use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, unixepoch())",
        [SCHEMA_VERSION],
    )?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS curve_overrides (
    storage_key TEXT PRIMARY KEY,
    override_id BLOB NOT NULL UNIQUE CHECK (length(override_id) = 16),
    client TEXT NOT NULL,
    category TEXT NOT NULL,
    product TEXT NOT NULL,
    name TEXT NOT NULL,
    curve BLOB NOT NULL,
    year INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
";
