use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::runner::CommandError;
use crate::sanitize::output_tail;

/// Failures of an external media generator run.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Workflow script not found: {0}")]
    ScriptNotFound(PathBuf),

    #[error("Failed to start workflow '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Workflow timed out after {}s: {stderr_tail}", .timeout.as_secs())]
    TimedOut {
        timeout: Duration,
        stdout_tail: String,
        stderr_tail: String,
    },

    #[error("Workflow {script} failed with code {code}: {stderr_tail}")]
    ExitStatus {
        script: String,
        code: String,
        stdout_tail: String,
        stderr_tail: String,
    },

    #[error("No artifacts were produced in {run_directory}")]
    NoArtifacts {
        run_directory: String,
        stdout_tail: String,
        stderr_tail: String,
    },

    #[error("Failed to prepare run directory '{path}': {source}")]
    RunDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to scan run directory: {0}")]
    Snapshot(#[from] walkdir::Error),

    #[error("Process runtime error: {0}")]
    Runtime(#[source] std::io::Error),
}

impl MediaError {
    /// Captured process output, when the process got far enough to produce any.
    pub fn output_tails(&self) -> Option<(&str, &str)> {
        match self {
            MediaError::ExitStatus {
                stdout_tail,
                stderr_tail,
                ..
            }
            | MediaError::NoArtifacts {
                stdout_tail,
                stderr_tail,
                ..
            }
            | MediaError::TimedOut {
                stdout_tail,
                stderr_tail,
                ..
            } => Some((stdout_tail, stderr_tail)),
            _ => None,
        }
    }
}

impl From<CommandError> for MediaError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Spawn { program, source } => MediaError::Spawn { program, source },
            CommandError::TimedOut {
                timeout,
                stdout,
                stderr,
                ..
            } => MediaError::TimedOut {
                timeout,
                stdout_tail: output_tail(&stdout),
                stderr_tail: output_tail(&stderr),
            },
            CommandError::Wait { source, .. } | CommandError::Runtime(source) => {
                MediaError::Runtime(source)
            }
        }
    }
}
