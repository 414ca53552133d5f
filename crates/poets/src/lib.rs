pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod logging;
pub mod media;
pub mod recorder;
pub mod runner;
pub mod sanitize;
pub mod service;
pub mod store;
pub mod worker;

pub use config::{load_config, Config};
pub use content::{ContentError, StructuredContent};
pub use db::{Database, DatabaseSettings, JournalMode, StorageError};
pub use error::{ConfigError, GeneratorError, LockError, PoetsError, Result};
pub use lifecycle::{
    ArtifactKind, ArtifactStatus, Claim, Lifecycle, LifecycleStatus, RequestKind, RetryPolicy,
    TransitionError,
};
pub use media::{MediaError, MediaGenerator, MediaJob};
pub use recorder::{ArtifactRecorder, GeneratedFile, RecordOutcome};
pub use service::QueueService;
pub use store::RecordStore;
pub use worker::{BatchSummary, ContentGenerator, ContentProducer, MediaConsumer};
