//! Database error types.

use std::path::PathBuf;

use rusqlite::ErrorCode;
use thiserror::Error;

use super::JournalMode;

/// Errors from database operations.
///
/// `rusqlite::Error` is classified exactly once, in the `From` impl below,
/// so every caller sees the same split between retryable contention and
/// conditions that must not be retried blindly.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The database stayed busy or locked for the whole busy-timeout window.
    #[error("Database is locked: {source}")]
    Locked {
        #[source]
        source: rusqlite::Error,
    },

    /// A constraint or invariant was violated. Indicates an upstream logic bug.
    #[error("Integrity violation: {message}")]
    Integrity { message: String },

    /// An update expected to hit exactly one row hit none.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// SQLite reported a malformed database image.
    #[error("Database is corrupt: {0}")]
    Corrupt(#[source] rusqlite::Error),

    /// SQLite could not open, read or write the database file.
    #[error("Database I/O failure: {0}")]
    IoFailure(#[source] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Any other SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// The file is not in the journal mode it was initialized with.
    #[error("Journal mode mismatch: database was initialized with '{expected}' but is '{found}'")]
    JournalModeMismatch { expected: JournalMode, found: String },

    /// The file has never been initialized through `Database::initialize`.
    #[error("Database at '{0}' has not been initialized")]
    NotInitialized(PathBuf),

    /// A JSON column could not be encoded or decoded.
    #[error("Failed to serialize column value: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Returns true when the caller may retry the operation with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Locked { .. })
    }

    /// Returns true for zero-rows-affected outcomes (lost update races).
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// Returns true when the database itself is unusable, so continuing a
    /// batch with the next item cannot succeed either.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StorageError::Corrupt(_)
                | StorageError::IoFailure(_)
                | StorageError::Io { .. }
                | StorageError::JournalModeMismatch { .. }
                | StorageError::NotInitialized(_)
        )
    }
}

enum Class {
    Locked,
    Integrity,
    Corrupt,
    IoFailure,
    Other,
}

fn classify(err: &rusqlite::Error) -> Class {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => Class::Locked,
            ErrorCode::ConstraintViolation => Class::Integrity,
            ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => Class::Corrupt,
            ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure
            | ErrorCode::DiskFull
            | ErrorCode::ReadOnly
            | ErrorCode::PermissionDenied => Class::IoFailure,
            _ => Class::Other,
        },
        _ => Class::Other,
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match classify(&err) {
            Class::Locked => StorageError::Locked { source: err },
            Class::Integrity => {
                let message = match &err {
                    rusqlite::Error::SqliteFailure(_, Some(msg)) => msg.clone(),
                    other => other.to_string(),
                };
                StorageError::Integrity { message }
            }
            Class::Corrupt => StorageError::Corrupt(err),
            Class::IoFailure => StorageError::IoFailure(err),
            Class::Other => StorageError::Sqlite(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(code: std::os::raw::c_int, msg: &str) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), Some(msg.to_string()))
    }

    #[test]
    fn test_busy_and_locked_are_retryable() {
        let busy: StorageError = failure(rusqlite::ffi::SQLITE_BUSY, "database is locked").into();
        let locked: StorageError = failure(rusqlite::ffi::SQLITE_LOCKED, "table locked").into();
        assert!(busy.is_retryable());
        assert!(locked.is_retryable());
    }

    #[test]
    fn test_constraint_maps_to_integrity() {
        let err: StorageError =
            failure(rusqlite::ffi::SQLITE_CONSTRAINT, "FOREIGN KEY constraint failed").into();
        match err {
            StorageError::Integrity { message } => {
                assert_eq!(message, "FOREIGN KEY constraint failed")
            }
            other => panic!("expected Integrity, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupt_and_io_are_not_retryable() {
        let corrupt: StorageError = failure(rusqlite::ffi::SQLITE_CORRUPT, "malformed").into();
        let io: StorageError = failure(rusqlite::ffi::SQLITE_IOERR, "disk I/O error").into();
        assert!(matches!(corrupt, StorageError::Corrupt(_)));
        assert!(matches!(io, StorageError::IoFailure(_)));
        assert!(!corrupt.is_retryable());
        assert!(!io.is_retryable());
        assert!(corrupt.is_fatal());
        assert!(io.is_fatal());
    }

    #[test]
    fn test_other_errors_fall_through() {
        let err: StorageError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, StorageError::Sqlite(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_found_display() {
        let err = StorageError::NotFound {
            entity: "request",
            id: 42,
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "request 42 not found");
    }
}
