//! Test harness for isolated queue tests.
//!
//! Every harness owns a temporary directory holding the database file and
//! the media output root, so tests can run in parallel without sharing
//! state.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use poets::db::request_repo::NewRequest;
use poets::db::{Database, DatabaseSettings, JournalMode, MIN_BUSY_TIMEOUT};
use poets::lifecycle::{Lifecycle, RequestKind};
use poets::recorder::ArtifactRecorder;
use poets::store::RecordStore;

pub struct TestHarness {
    temp_dir: TempDir,
    /// Path of the SQLite file.
    pub db_path: PathBuf,
    /// Media output root.
    pub media_root: PathBuf,
    pub lifecycle: Lifecycle,
}

impl TestHarness {
    /// A WAL database, the production default.
    pub fn new() -> Self {
        Self::with_journal_mode(JournalMode::Wal)
    }

    pub fn with_journal_mode(journal_mode: JournalMode) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("data").join("poets.db");
        let media_root = temp_dir.path().join("GeneratedMedia");

        let db = Database::initialize(
            &db_path,
            DatabaseSettings {
                journal_mode,
                busy_timeout: MIN_BUSY_TIMEOUT,
            },
        )
        .expect("Failed to initialize database");

        Self {
            temp_dir,
            db_path,
            media_root,
            lifecycle: Lifecycle::new(RecordStore::new(db)),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn store(&self) -> &RecordStore {
        self.lifecycle.store()
    }

    pub fn recorder(&self) -> ArtifactRecorder {
        ArtifactRecorder::new(self.lifecycle.clone(), &self.media_root)
    }

    /// An independent gateway on the same file, as a second process would
    /// open it.
    pub fn second_handle(&self) -> Lifecycle {
        let db = Database::open(&self.db_path, MIN_BUSY_TIMEOUT)
            .expect("Failed to open second handle");
        Lifecycle::new(RecordStore::new(db))
    }

    pub fn enqueue(&self, text: &str, kind: RequestKind) -> i64 {
        self.store()
            .create_request(&NewRequest::new(text, kind))
            .expect("Failed to create request")
    }

    /// Runs Stage 1 to completion with `body`.
    pub fn produce(&self, text: &str, kind: RequestKind, body: &str) -> i64 {
        let id = self.enqueue(text, kind);
        self.lifecycle
            .begin_generation(id)
            .expect("Failed to claim request");
        self.lifecycle
            .complete_generation(id, body)
            .expect("Failed to complete generation");
        id
    }

    /// Writes a file under the media root and returns its absolute path.
    pub fn write_media(&self, relative: &str, bytes: &[u8]) -> PathBuf {
        let path = self.media_root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, bytes).unwrap();
        path
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
