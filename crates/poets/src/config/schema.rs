use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::{DatabaseSettings, JournalMode, MIN_BUSY_TIMEOUT};
use crate::lifecycle::{ArtifactKind, RequestKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub generator: Option<GeneratorConfig>,
    #[serde(default)]
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Defaults to `~/.poets/data/poets.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub journal_mode: JournalMode,
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_busy_timeout_secs() -> u64 {
    MIN_BUSY_TIMEOUT.as_secs()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            journal_mode: JournalMode::default(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

impl DatabaseConfig {
    pub fn settings(&self) -> DatabaseSettings {
        DatabaseSettings {
            journal_mode: self.journal_mode,
            busy_timeout: Duration::from_secs(self.busy_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Defaults to `poets.lock` next to the database.
    #[serde(default)]
    pub lock_file: Option<PathBuf>,
    #[serde(default = "default_lock_timeout_minutes")]
    pub lock_timeout_minutes: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_batch_size() -> u32 {
    5
}

fn default_lock_timeout_minutes() -> u64 {
    45
}

fn default_poll_interval_secs() -> u64 {
    60
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            lock_file: None,
            lock_timeout_minutes: default_lock_timeout_minutes(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

/// External Stage 1 content generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_generator_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_generator_timeout_secs() -> u64 {
    900
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_queue_size")]
    pub queue_size: u32,
    #[serde(default = "default_media_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub comfyui_directory: Option<PathBuf>,
    /// Keyed by request kind.
    #[serde(default)]
    pub pipelines: BTreeMap<String, PipelineConfig>,
}

fn default_true() -> bool {
    true
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("GeneratedMedia")
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_queue_size() -> u32 {
    1
}

fn default_media_timeout_secs() -> u64 {
    600
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_directory: default_output_directory(),
            python: default_python(),
            queue_size: default_queue_size(),
            timeout_secs: default_media_timeout_secs(),
            comfyui_directory: None,
            pipelines: BTreeMap::new(),
        }
    }
}

impl MediaConfig {
    /// Configured pipelines with their parsed request kind.
    pub fn pipelines(&self) -> impl Iterator<Item = (RequestKind, &PipelineConfig)> {
        self.pipelines
            .iter()
            .map(|(kind, pipeline)| (RequestKind::from(kind.as_str()), pipeline))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub artifact_kind: ArtifactKind,
    pub script: PathBuf,
    #[serde(default = "default_prompt_arg")]
    pub prompt_arg: String,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_prompt_arg() -> String {
    "prompt".to_string()
}
