//! Wires configuration, storage and the two workers into one queue service.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::artifact_repo::Artifact;
use crate::db::content_repo::GeneratedContent;
use crate::db::request_repo::{NewRequest, Request};
use crate::db::Database;
use crate::error::{ConfigError, LockError, PoetsError, Result};
use crate::lifecycle::{Lifecycle, RequestKind};
use crate::lock::ProcessLock;
use crate::media::{MediaGenerator, ScriptPipeline};
use crate::recorder::ArtifactRecorder;
use crate::store::RecordStore;
use crate::worker::{BatchSummary, ContentGenerator, ContentProducer, MediaConsumer, ScriptContentGenerator};

/// How long `watch` sleeps between checks of the stop flag.
const STOP_POLL: Duration = Duration::from_millis(200);

/// Outcome of one `run_queue` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub produced: BatchSummary,
    pub consumed: BatchSummary,
}

/// Everything known about one request, as printed by `poets status`.
#[derive(Debug, Clone, Serialize)]
pub struct RequestStatus {
    pub request: Request,
    pub content: Option<GeneratedContent>,
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckItem {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckReport {
    pub items: Vec<CheckItem>,
}

impl CheckReport {
    fn push(&mut self, name: impl Into<String>, ok: bool, detail: impl Into<String>) {
        self.items.push(CheckItem {
            name: name.into(),
            ok,
            detail: detail.into(),
        });
    }

    pub fn passed(&self) -> bool {
        self.items.iter().all(|item| item.ok)
    }
}

pub struct QueueService {
    config: Config,
    lifecycle: Lifecycle,
    producer: Option<ContentProducer>,
    consumer: Option<MediaConsumer>,
    lock: ProcessLock,
}

impl QueueService {
    /// Initializes the configured database file. The only entry point that
    /// fixes a journal mode.
    pub fn init(config: &Config) -> Result<Database> {
        let path = database_path(config)?;
        let db = Database::initialize(path, config.database.settings())?;
        info!(
            path = %path.display(),
            journal_mode = %db.journal_mode(),
            "Database initialized"
        );
        Ok(db)
    }

    /// Opens (initializing on first use) the database and builds the workers
    /// the configuration asks for.
    pub fn from_config(config: Config) -> Result<Self> {
        let path = database_path(&config)?;
        let db = Database::open_or_initialize(path, config.database.settings())?;
        let mut service = Self::new(config, db);

        if let Some(generator) = &service.config.generator {
            let generator = ScriptContentGenerator::from_config(generator)?;
            service = service.with_content_generator(Arc::new(generator));
        }

        if service.config.media.enabled {
            let pipelines = service
                .config
                .media
                .pipelines()
                .map(|(kind, pipeline)| {
                    ScriptPipeline::from_config(&service.config.media, pipeline)
                        .map(|p| (kind, Arc::new(p) as Arc<dyn MediaGenerator>))
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for (kind, pipeline) in pipelines {
                service = service.with_media_generator(kind, pipeline);
            }
        }
        Ok(service)
    }

    /// Builds a service with no generators attached.
    pub fn new(config: Config, db: Database) -> Self {
        let lifecycle = Lifecycle::new(RecordStore::new(db.clone()));
        let lock_path = config
            .queue
            .lock_file
            .clone()
            .unwrap_or_else(|| sibling(db.path(), "poets.lock"));
        let lock = ProcessLock::new(
            lock_path,
            chrono::Duration::minutes(config.queue.lock_timeout_minutes as i64),
        );
        let consumer = config.media.enabled.then(|| {
            let recorder =
                ArtifactRecorder::new(lifecycle.clone(), config.media.output_directory.clone());
            MediaConsumer::new(lifecycle.clone(), recorder, config.queue.batch_size)
        });

        Self {
            config,
            lifecycle,
            producer: None,
            consumer,
            lock,
        }
    }

    pub fn with_content_generator(mut self, generator: Arc<dyn ContentGenerator>) -> Self {
        self.producer = Some(ContentProducer::new(
            self.lifecycle.clone(),
            generator,
            self.config.queue.batch_size,
        ));
        self
    }

    /// Routes `kind` to `generator`. Ignored when media generation is disabled.
    pub fn with_media_generator(mut self, kind: RequestKind, generator: Arc<dyn MediaGenerator>) -> Self {
        match self.consumer.as_mut() {
            Some(consumer) => consumer.register(kind, generator),
            None => debug!(kind = %kind, "Media disabled, pipeline ignored"),
        }
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn database(&self) -> &Database {
        self.lifecycle.store().database()
    }

    pub fn enqueue(&self, text: &str, kind: RequestKind, metadata: Option<Value>) -> Result<i64> {
        if text.trim().is_empty() {
            return Err(PoetsError::InvalidArgument(
                "request text must not be empty".to_string(),
            ));
        }
        let mut request = NewRequest::new(text, kind);
        if let Some(metadata) = metadata {
            if !metadata.is_object() {
                return Err(PoetsError::InvalidArgument(
                    "request metadata must be a JSON object".to_string(),
                ));
            }
            request = request.with_metadata(metadata);
        }
        let id = self.lifecycle.store().create_request(&request)?;
        info!(request_id = id, kind = %request.request_kind, "Request enqueued");
        Ok(id)
    }

    /// Runs one Stage 1 batch.
    pub fn produce(&self) -> Result<BatchSummary> {
        match &self.producer {
            Some(producer) => Ok(producer.run_once()?),
            None => {
                warn!("No content generator configured; skipping Stage 1");
                Ok(BatchSummary::default())
            }
        }
    }

    /// Runs one Stage 2 batch.
    pub fn consume(&self) -> Result<BatchSummary> {
        match &self.consumer {
            Some(consumer) => Ok(consumer.run_once()?),
            None => {
                debug!("Media generation disabled");
                Ok(BatchSummary::default())
            }
        }
    }

    /// One full pass under the process lock: produce, consume, checkpoint.
    pub fn run_queue(&self) -> Result<RunReport> {
        let _guard = self.lock.acquire()?;
        let started = Instant::now();

        let report = RunReport {
            produced: self.produce()?,
            consumed: self.consume()?,
        };
        self.database().checkpoint()?;

        info!(
            produced = %report.produced,
            consumed = %report.consumed,
            duration_ms = started.elapsed().as_millis() as u64,
            "Queue run finished"
        );
        Ok(report)
    }

    /// Repeats `run_queue` every `interval` until `stop` is set.
    ///
    /// A run skipped because another process holds the lock is not an
    /// error; the next tick tries again.
    pub fn watch(&self, interval: Duration, stop: &AtomicBool) -> Result<u64> {
        info!(interval_secs = interval.as_secs(), "Watching queue");
        let mut runs = 0;
        while !stop.load(Ordering::SeqCst) {
            match self.run_queue() {
                Ok(_) => runs += 1,
                Err(PoetsError::Lock(LockError::Held { pid, .. })) => {
                    warn!(pid, "Previous run still active, skipping tick");
                }
                Err(e) => return Err(e),
            }

            let next = Instant::now() + interval;
            while Instant::now() < next && !stop.load(Ordering::SeqCst) {
                std::thread::sleep(STOP_POLL.min(interval));
            }
        }
        info!(runs, "Stopped watching");
        Ok(runs)
    }

    pub fn status(&self, request_id: i64) -> Result<Option<RequestStatus>> {
        let store = self.lifecycle.store();
        let Some(request) = store.find_request(request_id)? else {
            return Ok(None);
        };
        let content = match request.content_ref {
            Some(content_id) => store.find_content(content_id)?,
            None => None,
        };
        let artifacts = store.fetch_artifacts(request_id)?;
        Ok(Some(RequestStatus {
            request,
            content,
            artifacts,
        }))
    }

    /// Verifies a configuration without initializing or modifying anything.
    pub fn check(config: &Config) -> CheckReport {
        let mut report = CheckReport::default();

        match database_path(config) {
            Ok(path) => match Database::open(path, config.database.settings().busy_timeout) {
                Ok(db) if db.journal_mode() == config.database.journal_mode => {
                    report.push("database", true, format!("journal mode {}", db.journal_mode()))
                }
                Ok(db) => report.push(
                    "database",
                    false,
                    format!(
                        "initialized as {} but configured as {}",
                        db.journal_mode(),
                        config.database.journal_mode
                    ),
                ),
                Err(e) => report.push("database", false, e.to_string()),
            },
            Err(e) => report.push("database", false, e.to_string()),
        }

        match &config.generator {
            Some(generator) => report.push("generator", true, generator.program.clone()),
            None => report.push("generator", true, "not configured; Stage 1 is skipped"),
        }

        if config.media.enabled {
            for (kind, pipeline) in config.media.pipelines() {
                let ok = pipeline.script.is_file();
                let detail = if ok {
                    format!("{} via {}", pipeline.artifact_kind, crate::sanitize::redact_path(&pipeline.script))
                } else {
                    format!("script not found: {}", pipeline.script.display())
                };
                report.push(format!("pipeline.{}", kind), ok, detail);
            }
        }
        report
    }
}

fn database_path(config: &Config) -> Result<&Path> {
    config.database.path.as_deref().ok_or_else(|| {
        ConfigError::Validation {
            message: "database.path is not set and no home directory is available".to_string(),
        }
        .into()
    })
}

fn sibling(path: &Path, name: &str) -> PathBuf {
    path.parent()
        .map(|dir| dir.join(name))
        .unwrap_or_else(|| PathBuf::from(name))
}
