//! Turns a finished Stage 2 run into artifact rows.

use std::path::{Component, Path, PathBuf};

use serde_json::Value;

use crate::db::artifact_repo::NewArtifact;
use crate::lifecycle::{ArtifactKind, Lifecycle, TransitionError};

/// A file produced by an external generator.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedFile {
    /// Location on disk, inside the output root. The root prefix is stripped
    /// first; a relative path without it is taken as already root-relative.
    pub path: PathBuf,
    pub kind: ArtifactKind,
    /// Must be a JSON object.
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Every artifact row was written and the request is `ready`.
    Ready { artifact_ids: Vec<i64> },
    /// Nothing was written and the request is in `error` with `reason`.
    Rejected { reason: String },
}

#[derive(Debug, Clone)]
pub struct ArtifactRecorder {
    lifecycle: Lifecycle,
    output_root: PathBuf,
}

impl ArtifactRecorder {
    pub fn new(lifecycle: Lifecycle, output_root: impl Into<PathBuf>) -> Self {
        Self {
            lifecycle,
            output_root: output_root.into(),
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Records `files` for a request that is in Stage 2 `processing`.
    ///
    /// All rows and the `ready` flip commit together. An empty batch or a
    /// file whose metadata is not an object rejects the whole batch and moves
    /// the request to `error` instead.
    ///
    /// # Panics
    /// Panics if a file lies outside the output root.
    pub fn record(
        &self,
        request_id: i64,
        files: &[GeneratedFile],
        summary: &Value,
    ) -> Result<RecordOutcome, TransitionError> {
        let rows = match self.build_rows(request_id, files) {
            Ok(rows) => rows,
            Err(reason) => {
                log::warn!("Rejecting artifacts for request {}: {}", request_id, reason);
                self.lifecycle
                    .fail_media(request_id, &reason, Some(summary))?;
                return Ok(RecordOutcome::Rejected { reason });
            }
        };

        let artifact_ids = self.lifecycle.complete_media(request_id, &rows, summary)?;
        log::info!(
            "Recorded {} artifact(s) for request {}",
            artifact_ids.len(),
            request_id
        );
        Ok(RecordOutcome::Ready { artifact_ids })
    }

    fn build_rows(&self, request_id: i64, files: &[GeneratedFile]) -> Result<Vec<NewArtifact>, String> {
        if files.is_empty() {
            return Err("generator produced no files".to_string());
        }

        let mut rows = Vec::with_capacity(files.len());
        for file in files {
            let relative = self.relative_path(&file.path);
            let Value::Object(metadata) = &file.metadata else {
                return Err(format!(
                    "metadata for '{}' is not a JSON object",
                    relative
                ));
            };
            rows.push(NewArtifact {
                request_id,
                artifact_kind: file.kind.clone(),
                preview_path: file.kind.has_preview().then(|| relative.clone()),
                file_path: relative,
                generation_metadata: metadata.clone(),
            });
        }
        Ok(rows)
    }

    /// Forward-slash path of `path` relative to the output root.
    fn relative_path(&self, path: &Path) -> String {
        let relative = match path.strip_prefix(&self.output_root) {
            Ok(relative) => relative,
            Err(_) if path.is_relative() => path,
            Err(_) => panic!(
                "generated file {} is outside the output root {}",
                path.display(),
                self.output_root.display()
            ),
        };

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => panic!(
                    "generated file {} escapes the output root",
                    path.display()
                ),
            }
        }
        assert!(
            !parts.is_empty(),
            "generated file path {} names the output root itself",
            path.display()
        );
        parts.join("/")
    }
}
