//! Database module for persistent storage.
//!
//! Uses rusqlite (SQLite). Every process that touches the shared database
//! goes through [`Database`]: connections are short-lived, scoped to one
//! operation, opened with the same busy timeout, and asserted to be in the
//! journal mode the file was initialized with.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};

pub mod artifact_repo;
pub mod content_repo;
pub mod error;
pub mod migrations;
pub mod request_repo;

pub use error::StorageError;

/// Minimum busy-timeout every connection is opened with.
pub const MIN_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const JOURNAL_MODE_KEY: &str = "journal_mode";

/// SQLite journal mode, decided once per database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    #[default]
    Wal,
    Delete,
}

impl JournalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalMode::Wal => "wal",
            JournalMode::Delete => "delete",
        }
    }

    /// `synchronous` level applied to every connection in this mode.
    fn synchronous(&self) -> &'static str {
        match self {
            JournalMode::Wal => "NORMAL",
            JournalMode::Delete => "FULL",
        }
    }
}

impl fmt::Display for JournalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JournalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wal" => Ok(JournalMode::Wal),
            "delete" => Ok(JournalMode::Delete),
            other => Err(format!("unsupported journal mode '{}'", other)),
        }
    }
}

/// Settings used when a database file is initialized.
#[derive(Debug, Clone, Copy)]
pub struct DatabaseSettings {
    pub journal_mode: JournalMode,
    pub busy_timeout: Duration,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::Wal,
            busy_timeout: MIN_BUSY_TIMEOUT,
        }
    }
}

struct Inner {
    path: PathBuf,
    journal_mode: JournalMode,
    busy_timeout: Duration,
}

/// Handle to the shared on-disk database.
///
/// Cloning is cheap (inner `Arc`). The handle holds no open connection;
/// [`Database::acquire`] opens one per operation and it closes on drop.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.inner.path)
            .field("journal_mode", &self.inner.journal_mode)
            .field("busy_timeout", &self.inner.busy_timeout)
            .finish()
    }
}

impl Database {
    /// Creates (or adopts) the database file, fixes its journal mode and
    /// runs all pending migrations.
    ///
    /// This is the only place a journal mode is ever assigned. If the file
    /// already records a different mode the call fails instead of switching.
    pub fn initialize(path: &Path, settings: DatabaseSettings) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let busy_timeout = settings.busy_timeout.max(MIN_BUSY_TIMEOUT);
        let mut conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        migrations::bootstrap(&conn)?;

        match recorded_journal_mode(&conn)? {
            Some(recorded) if recorded != settings.journal_mode => {
                return Err(StorageError::JournalModeMismatch {
                    expected: recorded,
                    found: settings.journal_mode.to_string(),
                });
            }
            Some(_) => {}
            None => {
                let applied: String = conn.pragma_update_and_check(
                    None,
                    "journal_mode",
                    settings.journal_mode.as_str(),
                    |row| row.get(0),
                )?;
                if !applied.eq_ignore_ascii_case(settings.journal_mode.as_str()) {
                    return Err(StorageError::JournalModeMismatch {
                        expected: settings.journal_mode,
                        found: applied,
                    });
                }
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                tx.execute(
                    "INSERT OR IGNORE INTO _settings (key, value) VALUES (?1, ?2)",
                    params![JOURNAL_MODE_KEY, settings.journal_mode.as_str()],
                )?;
                // A concurrent initializer may have won the insert.
                let winner = recorded_journal_mode(&tx)?.unwrap_or(settings.journal_mode);
                tx.commit()?;
                if winner != settings.journal_mode {
                    return Err(StorageError::JournalModeMismatch {
                        expected: winner,
                        found: settings.journal_mode.to_string(),
                    });
                }
                log::info!(
                    "Initialized database journal mode '{}' at {}",
                    settings.journal_mode,
                    path.display()
                );
            }
        }

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::run_all(&conn)?;
        drop(conn);

        let db = Self {
            inner: Arc::new(Inner {
                path: path.to_path_buf(),
                journal_mode: settings.journal_mode,
                busy_timeout,
            }),
        };
        // Assert the discipline holds for a fresh opener before handing out the handle.
        db.acquire()?;

        log::info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Opens an already-initialized database, adopting its recorded journal mode.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StorageError> {
        if !path.exists() {
            return Err(StorageError::NotInitialized(path.to_path_buf()));
        }

        let busy_timeout = busy_timeout.max(MIN_BUSY_TIMEOUT);
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(busy_timeout)?;

        let recorded = if settings_table_exists(&conn)? {
            recorded_journal_mode(&conn)?
        } else {
            None
        };
        let journal_mode =
            recorded.ok_or_else(|| StorageError::NotInitialized(path.to_path_buf()))?;
        drop(conn);

        let db = Self {
            inner: Arc::new(Inner {
                path: path.to_path_buf(),
                journal_mode,
                busy_timeout,
            }),
        };
        db.acquire()?;
        Ok(db)
    }

    /// Opens the database, initializing it first when the file is new.
    ///
    /// Fails with [`StorageError::JournalModeMismatch`] when the file was
    /// initialized with a different mode than `settings` asks for.
    pub fn open_or_initialize(path: &Path, settings: DatabaseSettings) -> Result<Self, StorageError> {
        match Self::open(path, settings.busy_timeout) {
            Ok(db) if db.journal_mode() == settings.journal_mode => {
                // Pick up migrations added since the file was created.
                db.with_conn(|conn| migrations::run_all(conn))?;
                Ok(db)
            }
            Ok(db) => Err(StorageError::JournalModeMismatch {
                expected: db.journal_mode(),
                found: settings.journal_mode.to_string(),
            }),
            Err(StorageError::NotInitialized(_)) => Self::initialize(path, settings),
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn journal_mode(&self) -> JournalMode {
        self.inner.journal_mode
    }

    pub fn busy_timeout(&self) -> Duration {
        self.inner.busy_timeout
    }

    /// Same file and mode, but a busy timeout below the floor. Lets tests
    /// hit `Locked` without waiting out the full timeout.
    #[cfg(test)]
    pub(crate) fn with_short_busy_timeout(&self, busy_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                path: self.inner.path.clone(),
                journal_mode: self.inner.journal_mode,
                busy_timeout,
            }),
        }
    }

    /// Opens a connection configured with the shared concurrency settings.
    ///
    /// The connection is closed when dropped. The journal mode is only
    /// read here, never assigned.
    pub fn acquire(&self) -> Result<Connection, StorageError> {
        let conn = Connection::open_with_flags(
            &self.inner.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(self.inner.busy_timeout)?;
        conn.execute_batch(&format!(
            "PRAGMA foreign_keys=ON; PRAGMA synchronous={};",
            self.inner.journal_mode.synchronous()
        ))?;

        let found: String = conn.pragma_query_value(None, "journal_mode", |row| row.get(0))?;
        if !found.eq_ignore_ascii_case(self.inner.journal_mode.as_str()) {
            log::error!(
                "Database {} is in journal mode '{}', expected '{}'",
                self.inner.path.display(),
                found,
                self.inner.journal_mode
            );
            return Err(StorageError::JournalModeMismatch {
                expected: self.inner.journal_mode,
                found,
            });
        }

        Ok(conn)
    }

    /// Runs `f` on a freshly acquired connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError>,
    {
        let conn = self.acquire()?;
        f(&conn)
    }

    /// Runs `f` inside one `BEGIN IMMEDIATE` transaction.
    ///
    /// Commits when `f` returns `Ok`; any error rolls back on drop.
    pub fn with_tx<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        let mut conn = self.acquire()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(StorageError::from)?;
        Ok(value)
    }

    /// Truncates the write-ahead log so out-of-process readers see a compact file.
    ///
    /// No-op outside WAL mode.
    pub fn checkpoint(&self) -> Result<(), StorageError> {
        if self.inner.journal_mode != JournalMode::Wal {
            return Ok(());
        }
        self.with_conn(|conn| {
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
            Ok(())
        })?;
        log::debug!("WAL checkpoint completed for {}", self.inner.path.display());
        Ok(())
    }
}

fn settings_table_exists(conn: &Connection) -> Result<bool, StorageError> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = '_settings'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn recorded_journal_mode(conn: &Connection) -> Result<Option<JournalMode>, StorageError> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM _settings WHERE key = ?1",
            params![JOURNAL_MODE_KEY],
            |row| row.get(0),
        )
        .optional()?;
    match value {
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|reason| StorageError::Integrity { message: reason }),
        None => Ok(None),
    }
}

/// Returns the canonical database path: `~/.poets/data/poets.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".poets").join("data").join("poets.db"))
}
