//! The lifecycle state machine.
//!
//! Every transition is a conditional `UPDATE ... WHERE status IN (...)`
//! whose guard is derived from the legal-move tables in `status.rs`. A
//! guard that matches no row means the row moved underneath us: for a
//! claim that is "someone else won", for anything else it is reported as
//! an illegal transition.

use std::thread;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use rusqlite::{Connection, Transaction};
use serde_json::Value;
use thiserror::Error;

use super::status::{ArtifactStatus, LifecycleStatus, Stage};
use crate::content::{self, ContentError};
use crate::db::artifact_repo::{self, NewArtifact};
use crate::db::content_repo::{self, NewContent};
use crate::db::request_repo::{self, ErrorUpdate, StatusUpdate};
use crate::db::StorageError;
use crate::store::RecordStore;

#[derive(Error, Debug)]
pub enum TransitionError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Illegal {stage} transition for request {request_id}: {from} -> {to}")]
    Illegal {
        request_id: i64,
        stage: Stage,
        from: String,
        to: String,
    },

    #[error(transparent)]
    MalformedContent(#[from] ContentError),
}

impl TransitionError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransitionError::Storage(e) if e.is_not_found())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, TransitionError::Storage(e) if e.is_fatal())
    }
}

/// Outcome of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// This caller now owns the row.
    Acquired,
    /// Another caller got there first. Not an error; move on.
    AlreadyClaimed,
}

/// How often a transition is re-run after the busy timeout expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first one.
    pub attempts: u32,
    /// Delay before the second try. Doubles on every further try.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff after failed try `attempt` (1-based), plus up to
    /// one `base_delay` of random jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1 << exponent);
        let jitter_ms = self.base_delay.as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
        delay + Duration::from_millis(jitter)
    }
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    store: RecordStore,
    retry: RetryPolicy,
}

impl Lifecycle {
    pub fn new(store: RecordStore) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Stage 1 claim: `unprocessed -> processing`, committed before any work starts.
    pub fn begin_generation(&self, request_id: i64) -> Result<Claim, TransitionError> {
        self.write(|tx| {
            let update = StatusUpdate {
                lifecycle: Some(LifecycleStatus::Processing),
                processed_at: Some(Utc::now()),
                expect_lifecycle: LifecycleStatus::predecessors(LifecycleStatus::Processing),
                ..Default::default()
            };
            claim_outcome(tx, request_id, request_repo::update_status(tx, request_id, &update)?)
        })
    }

    /// Stage 1 success: stores the content, links it and completes the request
    /// in one transaction. Kinds that need media enter `pending`.
    ///
    /// Returns the new content id.
    pub fn complete_generation(&self, request_id: i64, body: &str) -> Result<i64, TransitionError> {
        self.write(|tx| {
            let Some(request) = request_repo::find_by_id(tx, request_id)? else {
                return Err(not_found(request_id).into());
            };
            if !request
                .lifecycle_status
                .can_transition_to(LifecycleStatus::Completed)
            {
                return Err(illegal_lifecycle(
                    request_id,
                    request.lifecycle_status,
                    LifecycleStatus::Completed,
                ));
            }
            content::decode(&request.request_kind, body)?;

            let now = Utc::now();
            let content_id = content_repo::insert(
                tx,
                &NewContent {
                    content_kind: request.request_kind.clone(),
                    body: body.to_string(),
                    origin_request_id: request_id,
                },
                now,
            )?;

            let needs_media = request.request_kind.requires_media();
            let update = StatusUpdate {
                lifecycle: Some(LifecycleStatus::Completed),
                artifact: needs_media.then_some(ArtifactStatus::Pending),
                content_ref: Some(content_id),
                completed_at: (!needs_media).then_some(now),
                expect_lifecycle: LifecycleStatus::predecessors(LifecycleStatus::Completed),
                ..Default::default()
            };
            if request_repo::update_status(tx, request_id, &update)? == 0 {
                return Err(reject_lifecycle(tx, request_id, LifecycleStatus::Completed));
            }
            Ok(content_id)
        })
    }

    /// Stage 1 failure. Repeating it on a failed row only replaces the message.
    pub fn fail_generation(&self, request_id: i64, message: &str) -> Result<(), TransitionError> {
        self.write(|tx| {
            let mut from = LifecycleStatus::predecessors(LifecycleStatus::Failed);
            from.push(LifecycleStatus::Failed);
            let update = StatusUpdate {
                lifecycle: Some(LifecycleStatus::Failed),
                error_message: Some(ErrorUpdate::Set(message)),
                expect_lifecycle: from,
                ..Default::default()
            };
            if request_repo::update_status(tx, request_id, &update)? == 0 {
                return Err(reject_lifecycle(tx, request_id, LifecycleStatus::Failed));
            }
            Ok(())
        })
    }

    /// Stage 2 claim: `pending -> processing`, only for Stage 1 `completed`
    /// rows that carry content. At most one caller wins.
    pub fn claim_media(&self, request_id: i64) -> Result<Claim, TransitionError> {
        self.write(|tx| {
            let update = StatusUpdate {
                artifact: Some(ArtifactStatus::Processing),
                expect_lifecycle: vec![LifecycleStatus::Completed],
                expect_artifact: ArtifactStatus::predecessors(ArtifactStatus::Processing),
                require_content: true,
                ..Default::default()
            };
            claim_outcome(tx, request_id, request_repo::update_status(tx, request_id, &update)?)
        })
    }

    /// Stage 2 failure. Allowed from `processing`, and from `error` to
    /// refresh the message; `lifecycle_status` is left untouched.
    pub fn fail_media(
        &self,
        request_id: i64,
        message: &str,
        summary: Option<&Value>,
    ) -> Result<(), TransitionError> {
        self.write(|tx| {
            let update = StatusUpdate {
                artifact: Some(ArtifactStatus::Error),
                error_message: Some(ErrorUpdate::Set(message)),
                artifact_metadata: summary,
                expect_artifact: ArtifactStatus::predecessors(ArtifactStatus::Error),
                ..Default::default()
            };
            if request_repo::update_status(tx, request_id, &update)? == 0 {
                return Err(reject_artifact(tx, request_id, ArtifactStatus::Error));
            }
            Ok(())
        })
    }

    /// Stage 2 success: inserts every artifact, then flips `ready` as the
    /// last write of the same transaction. Nothing is kept if any step fails.
    pub fn complete_media(
        &self,
        request_id: i64,
        artifacts: &[NewArtifact],
        summary: &Value,
    ) -> Result<Vec<i64>, TransitionError> {
        self.write(|tx| {
            let now = Utc::now();
            let mut ids = Vec::with_capacity(artifacts.len());
            for artifact in artifacts {
                if artifact.request_id != request_id {
                    return Err(StorageError::Integrity {
                        message: format!(
                            "artifact for request {} recorded against request {}",
                            artifact.request_id, request_id
                        ),
                    }
                    .into());
                }
                ids.push(artifact_repo::insert(tx, artifact, now)?);
            }

            let update = StatusUpdate {
                artifact: Some(ArtifactStatus::Ready),
                completed_at: Some(now),
                artifact_metadata: Some(summary),
                expect_artifact: ArtifactStatus::predecessors(ArtifactStatus::Ready),
                ..Default::default()
            };
            if request_repo::update_status(tx, request_id, &update)? == 0 {
                return Err(reject_artifact(tx, request_id, ArtifactStatus::Ready));
            }
            Ok(ids)
        })
    }

    /// Runs one transition transaction, re-running it while the database
    /// stays locked past the busy timeout. A failed try has rolled back, so
    /// re-running it is safe.
    fn write<T, F>(&self, f: F) -> Result<T, TransitionError>
    where
        F: Fn(&Transaction<'_>) -> Result<T, TransitionError>,
    {
        let mut attempt = 1;
        loop {
            match self.store.database().with_tx(&f) {
                Err(TransitionError::Storage(e))
                    if e.is_retryable() && attempt < self.retry.attempts =>
                {
                    let delay = self.retry.backoff(attempt);
                    log::warn!(
                        "Database locked (attempt {}/{}), retrying in {:?}: {}",
                        attempt,
                        self.retry.attempts,
                        delay,
                        e
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

fn not_found(request_id: i64) -> StorageError {
    StorageError::NotFound {
        entity: "request",
        id: request_id,
    }
}

fn claim_outcome(
    conn: &Connection,
    request_id: i64,
    affected: usize,
) -> Result<Claim, TransitionError> {
    if affected == 1 {
        return Ok(Claim::Acquired);
    }
    if request_repo::exists(conn, request_id)? {
        Ok(Claim::AlreadyClaimed)
    } else {
        Err(not_found(request_id).into())
    }
}

fn illegal_lifecycle(
    request_id: i64,
    from: LifecycleStatus,
    to: LifecycleStatus,
) -> TransitionError {
    TransitionError::Illegal {
        request_id,
        stage: Stage::Generation,
        from: from.to_string(),
        to: to.to_string(),
    }
}

/// Explains a zero-row Stage 1 update.
fn reject_lifecycle(conn: &Connection, request_id: i64, to: LifecycleStatus) -> TransitionError {
    match request_repo::find_by_id(conn, request_id) {
        Ok(Some(current)) => illegal_lifecycle(request_id, current.lifecycle_status, to),
        Ok(None) => not_found(request_id).into(),
        Err(e) => e.into(),
    }
}

/// Explains a zero-row Stage 2 update.
fn reject_artifact(conn: &Connection, request_id: i64, to: ArtifactStatus) -> TransitionError {
    match request_repo::find_by_id(conn, request_id) {
        Ok(Some(current)) => TransitionError::Illegal {
            request_id,
            stage: Stage::Media,
            from: current.artifact_status.to_string(),
            to: to.to_string(),
        },
        Ok(None) => not_found(request_id).into(),
        Err(e) => e.into(),
    }
}
