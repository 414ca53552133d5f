//! File-based lock that keeps two queue runs of one service from overlapping.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LockError;

/// How long a freshly created lock file may stay empty or partial before it
/// counts as abandoned. Covers the gap between `create_new` and the write.
const WRITE_GRACE: std::time::Duration = std::time::Duration::from_secs(10);

/// Contents of the lock file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub timeout_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProcessLock {
    path: PathBuf,
    timeout: Duration,
}

impl ProcessLock {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Takes the lock, first clearing a stale or unreadable lock file.
    ///
    /// Fails with [`LockError::Held`] while a live holder's lock has not
    /// reached its `timeout_at`.
    pub fn acquire(&self) -> Result<LockGuard, LockError> {
        self.cleanup_stale()?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let pid = self.read_info().map(|info| info.pid).unwrap_or(0);
                return Err(LockError::Held {
                    path: self.path.clone(),
                    pid,
                });
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let now = Utc::now();
        let info = LockInfo {
            pid: std::process::id(),
            started_at: now,
            timeout_at: now + self.timeout,
        };
        let guard = LockGuard {
            path: Some(self.path.clone()),
        };
        file.write_all(&serde_json::to_vec(&info)?)
            .and_then(|_| file.sync_all())
            .map_err(|e| self.io_error(e))?;

        log::debug!("Acquired process lock {}", self.path.display());
        Ok(guard)
    }

    fn read_info(&self) -> Option<LockInfo> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// True while the file's mtime is within [`WRITE_GRACE`], or in the future.
    fn recently_written(&self) -> bool {
        match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => match modified.elapsed() {
                Ok(age) => age < WRITE_GRACE,
                Err(_) => true,
            },
            Err(_) => false,
        }
    }

    fn cleanup_stale(&self) -> Result<(), LockError> {
        if !self.path.exists() {
            return Ok(());
        }
        let reason = match self.read_info() {
            Some(info) if Utc::now() > info.timeout_at => "timed out",
            Some(_) => return Ok(()),
            None if self.recently_written() => return Ok(()),
            None => "unreadable",
        };
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                log::warn!("Removed {} lock file {}", reason, self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn io_error(&self, source: std::io::Error) -> LockError {
        LockError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Removes the lock file when dropped.
#[derive(Debug)]
pub struct LockGuard {
    path: Option<PathBuf>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to remove lock file {}: {}", path.display(), e);
            }
        }
    }
}
