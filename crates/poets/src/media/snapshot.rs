//! Before/after file snapshots used to find what a workflow wrote.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use walkdir::WalkDir;

/// Relative path -> (mtime in nanoseconds, size in bytes).
pub type Snapshot = BTreeMap<PathBuf, (u128, u64)>;

/// Snapshots every regular file under `root`. A missing root is empty.
pub fn snapshot_files(root: &Path) -> Result<Snapshot, walkdir::Error> {
    let mut snapshot = Snapshot::new();
    if !root.exists() {
        return Ok(snapshot);
    }

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = entry.metadata()?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        if let Ok(relative) = entry.path().strip_prefix(root) {
            snapshot.insert(relative.to_path_buf(), (mtime, metadata.len()));
        }
    }
    Ok(snapshot)
}

/// Files under `root` that are new or changed since `before`, sorted by path.
pub fn detect_new_files(root: &Path, before: &Snapshot) -> Result<Vec<PathBuf>, walkdir::Error> {
    let after = snapshot_files(root)?;
    Ok(after
        .into_iter()
        .filter(|(path, meta)| before.get(path) != Some(meta))
        .map(|(path, _)| root.join(path))
        .collect())
}
