use std::path::PathBuf;

use thiserror::Error;

use crate::content::ContentError;
use crate::db::StorageError;
use crate::lifecycle::TransitionError;
use crate::media::MediaError;
use crate::runner::CommandError;

#[derive(Error, Debug)]
pub enum PoetsError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Content error: {0}")]
    Content(#[from] ContentError),

    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid pipeline '{kind}': {reason}")]
    InvalidPipeline { kind: String, reason: String },
}

/// Failures of the Stage 1 content generator.
#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Generator exited with code {code}: {stderr_tail}")]
    ExitStatus { code: String, stderr_tail: String },

    #[error("Generator produced no output")]
    EmptyOutput,

    #[error("Generator unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Another run holds the lock at '{path}' (pid {pid})")]
    Held { path: PathBuf, pid: u32 },

    #[error("Lock file I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode lock file: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PoetsError>;
