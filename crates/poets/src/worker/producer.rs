//! Stage 1 driver: turns unprocessed requests into stored content.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, info_span, warn};

use super::{BatchSummary, ItemOutcome};
use crate::config::GeneratorConfig;
use crate::db::request_repo::Request;
use crate::error::GeneratorError;
use crate::lifecycle::{Claim, Lifecycle, TransitionError};
use crate::runner::{CommandRunner, CommandSpec};
use crate::sanitize::output_tail;

/// The opaque agent/LLM layer: request in, content body out.
pub trait ContentGenerator: Send + Sync {
    fn generate(&self, request: &Request) -> Result<String, GeneratorError>;
}

/// Runs an external command and uses its stdout as the content body.
///
/// The command receives `--kind <kind> --request <text>` after its
/// configured arguments.
#[derive(Debug)]
pub struct ScriptContentGenerator {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    runner: CommandRunner,
}

impl ScriptContentGenerator {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        timeout: Duration,
    ) -> Result<Self, GeneratorError> {
        Ok(Self {
            program: program.into(),
            args,
            timeout,
            runner: CommandRunner::new()?,
        })
    }

    pub fn from_config(config: &GeneratorConfig) -> Result<Self, GeneratorError> {
        Self::new(
            &config.program,
            config.args.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

impl ContentGenerator for ScriptContentGenerator {
    fn generate(&self, request: &Request) -> Result<String, GeneratorError> {
        let spec = CommandSpec::new(&self.program, self.timeout)
            .args(self.args.iter().cloned())
            .arg("--kind")
            .arg(request.request_kind.as_str())
            .arg("--request")
            .arg(&request.request_text);

        let output = self.runner.run(&spec)?;
        if !output.success() {
            return Err(GeneratorError::ExitStatus {
                code: output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                stderr_tail: output_tail(&output.stderr),
            });
        }

        let body = output.stdout.trim();
        if body.is_empty() {
            return Err(GeneratorError::EmptyOutput);
        }
        debug!(
            duration_ms = output.duration.as_millis() as u64,
            "Generator finished"
        );
        Ok(body.to_string())
    }
}

pub struct ContentProducer {
    lifecycle: Lifecycle,
    generator: Arc<dyn ContentGenerator>,
    batch_size: u32,
}

impl ContentProducer {
    pub fn new(lifecycle: Lifecycle, generator: Arc<dyn ContentGenerator>, batch_size: u32) -> Self {
        Self {
            lifecycle,
            generator,
            batch_size,
        }
    }

    /// Processes up to `batch_size` unprocessed requests, oldest first.
    pub fn run_once(&self) -> Result<BatchSummary, TransitionError> {
        let _span = info_span!("produce", batch_size = self.batch_size).entered();

        let requests = self
            .lifecycle
            .store()
            .fetch_unprocessed_requests(self.batch_size)?;
        let mut summary = BatchSummary::default();
        if requests.is_empty() {
            debug!("No unprocessed requests");
            return Ok(summary);
        }

        for request in &requests {
            let _item = info_span!(
                "generate_content",
                request_id = request.id,
                kind = %request.request_kind,
            )
            .entered();

            match self.process(request) {
                Ok(outcome) => summary.record(outcome),
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Database unusable, stopping batch");
                    return Err(e);
                }
                Err(e) => {
                    error!(error = %e, "Request failed");
                    summary.record(ItemOutcome::Failed);
                }
            }
        }

        info!(%summary, "Content batch finished");
        Ok(summary)
    }

    fn process(&self, request: &Request) -> Result<ItemOutcome, TransitionError> {
        if self.lifecycle.begin_generation(request.id)? == Claim::AlreadyClaimed {
            debug!("Already claimed");
            return Ok(ItemOutcome::Skipped);
        }

        let body = match self.generator.generate(request) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Content generation failed");
                self.lifecycle.fail_generation(request.id, &e.to_string())?;
                return Ok(ItemOutcome::Failed);
            }
        };

        match self.lifecycle.complete_generation(request.id, &body) {
            Ok(content_id) => {
                info!(content_id, "Content stored");
                Ok(ItemOutcome::Succeeded)
            }
            Err(TransitionError::MalformedContent(e)) => {
                warn!(error = %e, "Generated content rejected");
                self.lifecycle.fail_generation(request.id, &e.to_string())?;
                Ok(ItemOutcome::Failed)
            }
            Err(e) => {
                if let Err(fail) = self.lifecycle.fail_generation(request.id, &e.to_string()) {
                    warn!(error = %fail, "Could not record failure; row stays processing");
                }
                Err(e)
            }
        }
    }
}
