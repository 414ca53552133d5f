//! Record store: typed operations over requests, content and artifacts.
//!
//! Each operation runs in exactly one transaction on a short-lived
//! connection. The store executes; it does not decide which transition is
//! legal (see [`crate::lifecycle::Lifecycle`]).

use chrono::Utc;
use serde_json::{Map, Value};

use crate::db::artifact_repo::{self, Artifact, NewArtifact};
use crate::db::content_repo::{self, GeneratedContent, NewContent};
use crate::db::request_repo::{
    self, ErrorUpdate, NewRequest, ReadyRequest, Request, RequestFilter, StatusUpdate,
};
use crate::db::{Database, StorageError};
use crate::lifecycle::{ArtifactStatus, LifecycleStatus, RequestKind};

#[derive(Debug, Clone)]
pub struct RecordStore {
    db: Database,
}

impl RecordStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Inserts a request in `unprocessed` and returns its id.
    pub fn create_request(&self, request: &NewRequest) -> Result<i64, StorageError> {
        let id = self
            .db
            .with_tx(|tx| request_repo::insert(tx, request, Utc::now()))?;
        log::debug!("Created request {} ({})", id, request.request_kind);
        Ok(id)
    }

    pub fn find_request(&self, id: i64) -> Result<Option<Request>, StorageError> {
        self.db.with_conn(|conn| request_repo::find_by_id(conn, id))
    }

    pub fn find_content(&self, id: i64) -> Result<Option<GeneratedContent>, StorageError> {
        self.db.with_conn(|conn| content_repo::find_by_id(conn, id))
    }

    /// Completed requests of `kind` awaiting media, oldest first, with their content.
    pub fn fetch_ready_requests(
        &self,
        kind: &RequestKind,
        limit: u32,
    ) -> Result<Vec<ReadyRequest>, StorageError> {
        self.db
            .with_tx(|tx| request_repo::fetch_ready(tx, kind, limit))
    }

    pub fn fetch_unprocessed_requests(&self, limit: u32) -> Result<Vec<Request>, StorageError> {
        self.db
            .with_tx(|tx| request_repo::fetch_unprocessed(tx, limit))
    }

    /// Sets the Stage 1 status. A supplied message is written with the
    /// status; otherwise any existing message is left as is.
    pub fn set_lifecycle(
        &self,
        id: i64,
        status: LifecycleStatus,
        error_message: Option<&str>,
    ) -> Result<(), StorageError> {
        self.db.with_tx(|tx| {
            let Some(current) = request_repo::find_by_id(tx, id)? else {
                return Err(not_found(id));
            };
            let now = Utc::now();
            let update = StatusUpdate {
                lifecycle: Some(status),
                error_message: error_message.map(ErrorUpdate::Set),
                processed_at: (status == LifecycleStatus::Processing).then_some(now),
                completed_at: (status == LifecycleStatus::Completed
                    && !current.request_kind.requires_media())
                .then_some(now),
                ..Default::default()
            };
            expect_one(request_repo::update_status(tx, id, &update)?, id)
        })
    }

    /// Sets the Stage 2 status, same message contract as [`Self::set_lifecycle`].
    pub fn set_artifact_status(
        &self,
        id: i64,
        status: ArtifactStatus,
        error_message: Option<&str>,
    ) -> Result<(), StorageError> {
        self.db.with_tx(|tx| {
            let update = StatusUpdate {
                artifact: Some(status),
                error_message: error_message.map(ErrorUpdate::Set),
                completed_at: (status == ArtifactStatus::Ready).then(Utc::now),
                ..Default::default()
            };
            expect_one(request_repo::update_status(tx, id, &update)?, id)
        })
    }

    /// Removes the error message. The only operation that does.
    pub fn clear_error(&self, id: i64) -> Result<(), StorageError> {
        self.db.with_tx(|tx| {
            let update = StatusUpdate {
                error_message: Some(ErrorUpdate::Clear),
                ..Default::default()
            };
            expect_one(request_repo::update_status(tx, id, &update)?, id)
        })
    }

    /// Points a request at its content. Refused once the request is completed.
    pub fn link_content(&self, id: i64, content_id: i64) -> Result<(), StorageError> {
        self.db.with_tx(|tx| {
            let update = StatusUpdate {
                content_ref: Some(content_id),
                exclude_lifecycle: Some(LifecycleStatus::Completed),
                ..Default::default()
            };
            if request_repo::update_status(tx, id, &update)? == 1 {
                return Ok(());
            }
            if request_repo::exists(tx, id)? {
                Err(StorageError::Integrity {
                    message: format!("request {} is completed; content cannot be relinked", id),
                })
            } else {
                Err(not_found(id))
            }
        })
    }

    pub fn insert_content(&self, content: &NewContent) -> Result<i64, StorageError> {
        self.db
            .with_tx(|tx| content_repo::insert(tx, content, Utc::now()))
    }

    pub fn insert_artifact(&self, artifact: &NewArtifact) -> Result<i64, StorageError> {
        self.db
            .with_tx(|tx| artifact_repo::insert(tx, artifact, Utc::now()))
    }

    /// Artifacts of a request, newest first.
    pub fn fetch_artifacts(&self, request_id: i64) -> Result<Vec<Artifact>, StorageError> {
        self.db
            .with_conn(|conn| artifact_repo::list_for_request(conn, request_id))
    }

    pub fn patch_artifact_metadata(
        &self,
        artifact_id: i64,
        patch: &Map<String, Value>,
    ) -> Result<(), StorageError> {
        self.db.with_tx(|tx| {
            match artifact_repo::patch_metadata(tx, artifact_id, patch, Utc::now())? {
                0 => Err(StorageError::NotFound {
                    entity: "artifact",
                    id: artifact_id,
                }),
                _ => Ok(()),
            }
        })
    }

    /// Lists requests newest first, returning the page and the total match count.
    pub fn list_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<(Vec<Request>, u64), StorageError> {
        self.db.with_conn(|conn| request_repo::query(conn, filter))
    }
}

fn not_found(id: i64) -> StorageError {
    StorageError::NotFound {
        entity: "request",
        id,
    }
}

fn expect_one(affected: usize, id: i64) -> Result<(), StorageError> {
    match affected {
        0 => Err(not_found(id)),
        _ => Ok(()),
    }
}
