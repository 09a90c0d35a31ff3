//! Database schema migrations for SQLite.
//!
//! Simple versioned migrations: each one is a SQL batch taking the schema
//! from version N to N+1, tracked in `schema_migrations`.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema. Idempotent.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Append-only record storage. There is deliberately no UPDATE or
        -- DELETE path against this table anywhere in the crate.
        CREATE TABLE records (
            hash BLOB PRIMARY KEY,            -- 32 bytes, digest of canonical bytes
            anchor_id TEXT NOT NULL,          -- owning chain
            record_id INTEGER NOT NULL,       -- 1-indexed position within the chain
            slot TEXT NOT NULL,               -- producer label
            kind TEXT NOT NULL,               -- record kind string
            timestamp INTEGER NOT NULL,       -- producer-claimed timestamp (Unix ms)
            prev_hash BLOB NOT NULL,          -- 32 bytes, all-zero for genesis
            payload TEXT NOT NULL,            -- JSON document
            signature BLOB,                   -- CBOR-encoded signature, nullable
            version INTEGER NOT NULL,         -- record schema version
            ingested_at INTEGER NOT NULL,     -- local commit timestamp (Unix ms)

            UNIQUE(anchor_id, record_id)
        );

        -- Immutable Merkle summaries of committed record ranges.
        CREATE TABLE checkpoints (
            checkpoint_id BLOB PRIMARY KEY,   -- 32 bytes, content-derived
            anchor_id TEXT NOT NULL,
            start_id INTEGER NOT NULL,        -- first covered record (inclusive)
            end_id INTEGER NOT NULL,          -- last covered record (inclusive)
            merkle_root BLOB NOT NULL,        -- 32 bytes
            signature BLOB,                   -- CBOR-encoded signature, nullable
            created_at INTEGER NOT NULL,
            record_count INTEGER NOT NULL,

            UNIQUE(anchor_id, start_id)
        );

        -- Indexes for chain walks and time-window queries.
        CREATE INDEX idx_records_anchor_id ON records(anchor_id, record_id);
        CREATE INDEX idx_records_anchor_ts ON records(anchor_id, timestamp);
        CREATE INDEX idx_checkpoints_anchor ON checkpoints(anchor_id, start_id);
        "#,
    )?;

    Ok(())
}

/// Get current time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"records".to_string()));
        assert!(tables.contains(&"checkpoints".to_string()));
        assert!(tables.contains(&"schema_migrations".to_string()));
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }
}
