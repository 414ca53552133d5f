//! Stage 2 media generation.
//!
//! The consumer only knows the [`MediaGenerator`] trait. The shipped
//! implementation, [`ScriptPipeline`], runs an exported workflow script in a
//! fresh per-request directory and reports whatever files appear there.

mod error;
mod script;
pub mod snapshot;

pub use error::MediaError;
pub use script::{ScriptPipeline, ScriptSettings};

use serde_json::Value;

use crate::lifecycle::{ArtifactKind, RequestKind};
use crate::recorder::GeneratedFile;

/// Input of one generator run.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaJob {
    pub request_id: i64,
    pub kind: RequestKind,
    /// Prompt rendered from the request's structured content.
    pub prompt: String,
    /// Request metadata, merged into every artifact's metadata.
    pub metadata: Option<Value>,
}

/// Output of a successful generator run.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub files: Vec<GeneratedFile>,
    /// Run summary stored as the request's `artifact_metadata`.
    pub summary: Value,
}

pub trait MediaGenerator: Send + Sync {
    fn artifact_kind(&self) -> ArtifactKind;

    fn generate(&self, job: &MediaJob) -> Result<Generation, MediaError>;
}
