//! Stage 2 driver: turns completed structured requests into media artifacts.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info, info_span, warn};

use super::{BatchSummary, ItemOutcome};
use crate::content;
use crate::db::request_repo::{ReadyRequest, RequestFilter};
use crate::lifecycle::{ArtifactStatus, Claim, Lifecycle, RequestKind, TransitionError};
use crate::media::{MediaGenerator, MediaJob};
use crate::recorder::{ArtifactRecorder, RecordOutcome};

pub struct MediaConsumer {
    lifecycle: Lifecycle,
    recorder: ArtifactRecorder,
    generators: BTreeMap<RequestKind, Arc<dyn MediaGenerator>>,
    batch_size: u32,
}

impl MediaConsumer {
    pub fn new(lifecycle: Lifecycle, recorder: ArtifactRecorder, batch_size: u32) -> Self {
        Self {
            lifecycle,
            recorder,
            generators: BTreeMap::new(),
            batch_size,
        }
    }

    /// Routes requests of `kind` to `generator`.
    pub fn register(&mut self, kind: RequestKind, generator: Arc<dyn MediaGenerator>) {
        self.generators.insert(kind, generator);
    }

    pub fn with_generator(mut self, kind: RequestKind, generator: Arc<dyn MediaGenerator>) -> Self {
        self.register(kind, generator);
        self
    }

    pub fn kinds(&self) -> impl Iterator<Item = &RequestKind> {
        self.generators.keys()
    }

    /// Processes up to `batch_size` ready requests per configured kind.
    pub fn run_once(&self) -> Result<BatchSummary, TransitionError> {
        let _span = info_span!("consume", batch_size = self.batch_size).entered();
        self.report_unrouted()?;

        let mut summary = BatchSummary::default();
        for (kind, generator) in &self.generators {
            let ready = self
                .lifecycle
                .store()
                .fetch_ready_requests(kind, self.batch_size)?;
            if ready.is_empty() {
                debug!(kind = %kind, "No ready requests");
                continue;
            }

            for item in &ready {
                let _item = info_span!(
                    "generate_media",
                    request_id = item.request.id,
                    kind = %kind,
                )
                .entered();

                match self.process(item, generator.as_ref()) {
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
        }

        if !summary.is_empty() {
            info!(%summary, "Media batch finished");
        }
        Ok(summary)
    }

    fn process(
        &self,
        item: &ReadyRequest,
        generator: &dyn MediaGenerator,
    ) -> Result<ItemOutcome, TransitionError> {
        let request_id = item.request.id;
        if self.lifecycle.claim_media(request_id)? == Claim::AlreadyClaimed {
            debug!("Already claimed");
            return Ok(ItemOutcome::Skipped);
        }

        let structured = match content::decode(&item.request.request_kind, &item.content.body) {
            Ok(structured) => structured,
            Err(e) => {
                warn!(error = %e, "Stored content does not decode");
                self.lifecycle.fail_media(request_id, &e.to_string(), None)?;
                return Ok(ItemOutcome::Failed);
            }
        };

        let job = MediaJob {
            request_id,
            kind: item.request.request_kind.clone(),
            prompt: structured.media_prompt(),
            metadata: item.request.metadata.clone(),
        };

        let generation = match generator.generate(&job) {
            Ok(generation) => generation,
            Err(e) => {
                warn!(error = %e, "Media generation failed");
                let summary = e.output_tails().map(|(stdout_tail, stderr_tail)| {
                    json!({"stdout_tail": stdout_tail, "stderr_tail": stderr_tail})
                });
                self.lifecycle
                    .fail_media(request_id, &e.to_string(), summary.as_ref())?;
                return Ok(ItemOutcome::Failed);
            }
        };

        match self
            .recorder
            .record(request_id, &generation.files, &generation.summary)
        {
            Ok(RecordOutcome::Ready { artifact_ids }) => {
                info!(artifacts = artifact_ids.len(), "Media ready");
                Ok(ItemOutcome::Succeeded)
            }
            Ok(RecordOutcome::Rejected { reason }) => {
                warn!(%reason, "Artifacts rejected");
                Ok(ItemOutcome::Failed)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(error = %e, "Recording artifacts failed");
                self.lifecycle
                    .fail_media(request_id, &e.to_string(), Some(&generation.summary))?;
                Ok(ItemOutcome::Failed)
            }
        }
    }

    /// Logs media kinds that have pending work but no pipeline. They stay pending.
    fn report_unrouted(&self) -> Result<(), TransitionError> {
        for kind in [RequestKind::ImagePrompt, RequestKind::LyricsPrompt] {
            if self.generators.contains_key(&kind) {
                continue;
            }
            let (_, waiting) = self.lifecycle.store().list_requests(&RequestFilter {
                artifact: Some(ArtifactStatus::Pending),
                kind: Some(kind.clone()),
                limit: Some(0),
                ..Default::default()
            })?;
            if waiting > 0 {
                warn!(kind = %kind, waiting, "No media pipeline configured; requests left pending");
            }
        }
        Ok(())
    }
}
