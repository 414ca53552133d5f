//! Schema versions for the shared database file.
//!
//! Two bookkeeping tables come first: `_settings` (the journal-mode record)
//! and `_migrations` (applied versions). Each numbered SQL file then runs
//! in its own `BEGIN IMMEDIATE` transaction together with its version row,
//! and the version is re-read inside that transaction. A producer and a
//! consumer opening a fresh file at the same moment therefore apply every
//! step exactly once.

use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use super::error::StorageError;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
    /// Column this step adds. The SQL is skipped if the column is present.
    adds_column: Option<(&'static str, &'static str)>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_requests_table",
        sql: include_str!("sql/001_create_requests.sql"),
        adds_column: None,
    },
    Migration {
        version: 2,
        name: "create_generated_content_table",
        sql: include_str!("sql/002_create_generated_content.sql"),
        adds_column: None,
    },
    Migration {
        version: 3,
        name: "create_artifacts_table",
        sql: include_str!("sql/003_create_artifacts.sql"),
        adds_column: None,
    },
    Migration {
        version: 4,
        name: "add_artifact_metadata_to_requests",
        sql: include_str!("sql/004_add_artifact_metadata.sql"),
        adds_column: Some(("requests", "artifact_metadata")),
    },
];

/// Latest schema version this build knows about.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Creates the bookkeeping tables. Safe to call on every open.
pub fn bootstrap(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;
    Ok(())
}

/// Highest applied version, 0 for a fresh file.
pub fn current_version(conn: &Connection) -> Result<u32, StorageError> {
    let version = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |r| {
        r.get(0)
    })?;
    Ok(version)
}

/// Applies every pending step and returns how many this call applied.
pub fn run_all(conn: &Connection) -> Result<u32, StorageError> {
    bootstrap(conn)?;
    if current_version(conn)? >= latest_version() {
        return Ok(0);
    }

    let mut applied = 0;
    for migration in MIGRATIONS {
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        if current_version(&tx)? >= migration.version {
            continue;
        }
        apply(&tx, migration)?;
        tx.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )?;
        tx.commit()?;
        applied += 1;
    }
    Ok(applied)
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), StorageError> {
    if let Some((table, column)) = migration.adds_column {
        if has_column(conn, table, column)? {
            log::info!(
                "Migration v{} skipped: {}.{} already exists",
                migration.version,
                table,
                column
            );
            return Ok(());
        }
    }
    log::info!("Applying migration v{}: {}", migration.version, migration.name);
    conn.execute_batch(migration.sql)
        .map_err(|e| StorageError::Migration {
            version: migration.version,
            reason: e.to_string(),
        })
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, StorageError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2",
            params![table, column],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}
