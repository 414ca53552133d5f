//! Request repository: SQL over the `requests` table.
//!
//! Functions take a `&Connection` so callers can compose several of them
//! inside one transaction (`Transaction` derefs to `Connection`).

use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;

use super::content_repo::GeneratedContent;
use super::StorageError;
use crate::lifecycle::{ArtifactStatus, LifecycleStatus, RequestKind};

/// A request row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub id: i64,
    pub request_text: String,
    pub request_kind: RequestKind,
    pub lifecycle_status: LifecycleStatus,
    pub artifact_status: ArtifactStatus,
    pub content_ref: Option<i64>,
    pub metadata: Option<Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub artifact_metadata: Option<Value>,
}

impl Request {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            request_text: row.get("request_text")?,
            request_kind: row.get("request_kind")?,
            lifecycle_status: row.get("lifecycle_status")?,
            artifact_status: row.get("artifact_status")?,
            content_ref: row.get("content_ref")?,
            metadata: row.get("metadata")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            processed_at: row.get("processed_at")?,
            completed_at: row.get("completed_at")?,
            artifact_metadata: row.get("artifact_metadata")?,
        })
    }
}

/// A request ready for Stage 2 together with its joined content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadyRequest {
    pub request: Request,
    pub content: GeneratedContent,
}

impl ReadyRequest {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            request: Request::from_row(row)?,
            content: GeneratedContent {
                id: row.get("c_id")?,
                content_kind: row.get("c_kind")?,
                body: row.get("c_body")?,
                origin_request_id: row.get("c_origin")?,
                created_at: row.get("c_created_at")?,
            },
        })
    }
}

/// Fields supplied by the producer when creating a request.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub request_text: String,
    pub request_kind: RequestKind,
    pub metadata: Option<Value>,
}

impl NewRequest {
    pub fn new(request_text: impl Into<String>, request_kind: RequestKind) -> Self {
        Self {
            request_text: request_text.into(),
            request_kind,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// What to do with `error_message` in a status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorUpdate<'a> {
    Set(&'a str),
    Clear,
}

/// A single-row status update with optional guards.
///
/// Unset fields are left untouched. Non-empty `expect_*` lists turn the
/// update into a conditional one (`... AND status IN (...)`), which is
/// the claim primitive: only one caller can win it.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate<'a> {
    pub lifecycle: Option<LifecycleStatus>,
    pub artifact: Option<ArtifactStatus>,
    pub error_message: Option<ErrorUpdate<'a>>,
    pub content_ref: Option<i64>,
    pub processed_at: Option<DateTime<Utc>>,
    /// Written with `COALESCE`, so the first value sticks.
    pub completed_at: Option<DateTime<Utc>>,
    pub artifact_metadata: Option<&'a Value>,
    pub expect_lifecycle: Vec<LifecycleStatus>,
    pub expect_artifact: Vec<ArtifactStatus>,
    pub exclude_lifecycle: Option<LifecycleStatus>,
    pub require_content: bool,
}

/// Query filter parameters for request listing.
#[derive(Debug, Default, Clone)]
pub struct RequestFilter {
    pub lifecycle: Option<LifecycleStatus>,
    pub artifact: Option<ArtifactStatus>,
    pub kind: Option<RequestKind>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new request in `unprocessed` and returns its id.
pub fn insert(
    conn: &Connection,
    request: &NewRequest,
    created_at: DateTime<Utc>,
) -> Result<i64, StorageError> {
    conn.execute(
        "INSERT INTO requests (request_text, request_kind, lifecycle_status, artifact_status,
         metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            request.request_text,
            request.request_kind,
            LifecycleStatus::Unprocessed,
            ArtifactStatus::None,
            request.metadata,
            created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Finds a request by its ID.
pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Request>, StorageError> {
    let row = conn
        .query_row(
            "SELECT * FROM requests WHERE id = ?1",
            params![id],
            Request::from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn exists(conn: &Connection, id: i64) -> Result<bool, StorageError> {
    let found: Option<i64> = conn
        .query_row("SELECT id FROM requests WHERE id = ?1", params![id], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

/// Requests waiting for Stage 1, oldest first.
pub fn fetch_unprocessed(conn: &Connection, limit: u32) -> Result<Vec<Request>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM requests
         WHERE lifecycle_status = ?1
         ORDER BY created_at ASC, id ASC
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(
            params![LifecycleStatus::Unprocessed, limit],
            Request::from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Requests of `kind` waiting for Stage 2, oldest first, inner-joined to
/// their content. Rows whose `content_ref` does not resolve are never returned.
pub fn fetch_ready(
    conn: &Connection,
    kind: &RequestKind,
    limit: u32,
) -> Result<Vec<ReadyRequest>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT r.*,
                c.id AS c_id,
                c.content_kind AS c_kind,
                c.body AS c_body,
                c.origin_request_id AS c_origin,
                c.created_at AS c_created_at
         FROM requests r
         INNER JOIN generated_content c ON c.id = r.content_ref
         WHERE r.lifecycle_status = ?1
           AND r.artifact_status = ?2
           AND r.request_kind = ?3
         ORDER BY r.created_at ASC, r.id ASC
         LIMIT ?4",
    )?;
    let rows = stmt
        .query_map(
            params![
                LifecycleStatus::Completed,
                ArtifactStatus::Pending,
                kind,
                limit
            ],
            ReadyRequest::from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Applies `update` to request `id`. Returns the number of rows affected (0 or 1).
pub fn update_status(
    conn: &Connection,
    id: i64,
    update: &StatusUpdate<'_>,
) -> Result<usize, StorageError> {
    let mut assignments: Vec<String> = Vec::new();
    let mut values: Vec<&dyn ToSql> = vec![&id];

    if let Some(ref status) = update.lifecycle {
        values.push(status);
        assignments.push(format!("lifecycle_status = ?{}", values.len()));
    }
    if let Some(ref status) = update.artifact {
        values.push(status);
        assignments.push(format!("artifact_status = ?{}", values.len()));
    }
    match update.error_message {
        Some(ErrorUpdate::Set(ref message)) => {
            values.push(message);
            assignments.push(format!("error_message = ?{}", values.len()));
        }
        Some(ErrorUpdate::Clear) => assignments.push("error_message = NULL".to_string()),
        None => {}
    }
    if let Some(ref content_id) = update.content_ref {
        values.push(content_id);
        assignments.push(format!("content_ref = ?{}", values.len()));
    }
    if let Some(ref at) = update.processed_at {
        values.push(at);
        assignments.push(format!("processed_at = ?{}", values.len()));
    }
    if let Some(ref at) = update.completed_at {
        values.push(at);
        assignments.push(format!(
            "completed_at = COALESCE(completed_at, ?{})",
            values.len()
        ));
    }
    if let Some(metadata) = update.artifact_metadata {
        values.push(metadata);
        assignments.push(format!("artifact_metadata = ?{}", values.len()));
    }

    if assignments.is_empty() {
        return Err(StorageError::Integrity {
            message: "status update with no assignments".to_string(),
        });
    }

    let mut conditions = vec!["id = ?1".to_string()];
    if !update.expect_lifecycle.is_empty() {
        let mut slots = Vec::new();
        for status in &update.expect_lifecycle {
            values.push(status);
            slots.push(format!("?{}", values.len()));
        }
        conditions.push(format!("lifecycle_status IN ({})", slots.join(", ")));
    }
    if !update.expect_artifact.is_empty() {
        let mut slots = Vec::new();
        for status in &update.expect_artifact {
            values.push(status);
            slots.push(format!("?{}", values.len()));
        }
        conditions.push(format!("artifact_status IN ({})", slots.join(", ")));
    }
    if let Some(ref status) = update.exclude_lifecycle {
        values.push(status);
        conditions.push(format!("lifecycle_status != ?{}", values.len()));
    }
    if update.require_content {
        conditions.push("content_ref IS NOT NULL".to_string());
    }

    let sql = format!(
        "UPDATE requests SET {} WHERE {}",
        assignments.join(", "),
        conditions.join(" AND ")
    );
    let affected = conn.execute(&sql, values.as_slice())?;
    Ok(affected)
}

/// Queries requests with filters, newest first, returning (rows, total_count).
pub fn query(
    conn: &Connection,
    filter: &RequestFilter,
) -> Result<(Vec<Request>, u64), StorageError> {
    let mut conditions = Vec::new();
    let mut param_values: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(status) = filter.lifecycle {
        param_values.push(Box::new(status));
        conditions.push(format!("lifecycle_status = ?{}", param_values.len()));
    }
    if let Some(status) = filter.artifact {
        param_values.push(Box::new(status));
        conditions.push(format!("artifact_status = ?{}", param_values.len()));
    }
    if let Some(ref kind) = filter.kind {
        param_values.push(Box::new(kind.clone()));
        conditions.push(format!("request_kind = ?{}", param_values.len()));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM requests {}", where_clause);
    let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
    let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

    let limit = filter.limit.unwrap_or(100) as i64;
    let offset = filter.offset.unwrap_or(0) as i64;
    param_values.push(Box::new(limit));
    param_values.push(Box::new(offset));
    let query_sql = format!(
        "SELECT * FROM requests {} ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
        where_clause,
        param_values.len() - 1,
        param_values.len()
    );

    let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&query_sql)?;
    let rows = stmt
        .query_map(params_ref.as_slice(), Request::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((rows, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::content_repo::{self, NewContent};
    use crate::db::migrations;
    use chrono::TimeZone;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        migrations::run_all(&conn).unwrap();
        conn
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, day, 0, 0, 0).unwrap()
    }

    fn complete_with_content(conn: &Connection, id: i64, kind: RequestKind) -> i64 {
        let content_id = content_repo::insert(
            conn,
            &NewContent {
                content_kind: kind,
                body: "{\"prompt\":\"x\"}".to_string(),
                origin_request_id: id,
            },
            at(20),
        )
        .unwrap();
        let affected = update_status(
            conn,
            id,
            &StatusUpdate {
                lifecycle: Some(LifecycleStatus::Completed),
                artifact: Some(ArtifactStatus::Pending),
                content_ref: Some(content_id),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(affected, 1);
        content_id
    }

    #[test]
    fn test_insert_and_find() {
        let conn = test_conn();
        let id = insert(
            &conn,
            &NewRequest::new("a sunset", RequestKind::ImagePrompt)
                .with_metadata(serde_json::json!({"source": "ui"})),
            at(1),
        )
        .unwrap();

        let found = find_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(found.request_text, "a sunset");
        assert_eq!(found.request_kind, RequestKind::ImagePrompt);
        assert_eq!(found.lifecycle_status, LifecycleStatus::Unprocessed);
        assert_eq!(found.artifact_status, ArtifactStatus::None);
        assert_eq!(found.created_at, at(1));
        assert_eq!(found.metadata, Some(serde_json::json!({"source": "ui"})));
        assert!(found.content_ref.is_none());
    }

    #[test]
    fn test_find_nonexistent() {
        let conn = test_conn();
        assert!(find_by_id(&conn, 99).unwrap().is_none());
        assert!(!exists(&conn, 99).unwrap());
    }

    #[test]
    fn test_fetch_unprocessed_oldest_first() {
        let conn = test_conn();
        let late = insert(&conn, &NewRequest::new("late", RequestKind::Text), at(3)).unwrap();
        let early = insert(&conn, &NewRequest::new("early", RequestKind::Text), at(1)).unwrap();
        let mid = insert(&conn, &NewRequest::new("mid", RequestKind::Text), at(2)).unwrap();

        let rows = fetch_unprocessed(&conn, 10).unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![early, mid, late]);

        let capped = fetch_unprocessed(&conn, 2).unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn test_fetch_ready_filters_kind_and_status() {
        let conn = test_conn();
        let image = insert(&conn, &NewRequest::new("img", RequestKind::ImagePrompt), at(2)).unwrap();
        let lyrics =
            insert(&conn, &NewRequest::new("song", RequestKind::LyricsPrompt), at(1)).unwrap();
        let _waiting =
            insert(&conn, &NewRequest::new("later", RequestKind::ImagePrompt), at(3)).unwrap();

        complete_with_content(&conn, image, RequestKind::ImagePrompt);
        complete_with_content(&conn, lyrics, RequestKind::LyricsPrompt);

        let ready = fetch_ready(&conn, &RequestKind::ImagePrompt, 10).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].request.id, image);
        assert_eq!(ready[0].content.body, "{\"prompt\":\"x\"}");
        assert_eq!(ready[0].content.origin_request_id, image);
    }

    #[test]
    fn test_fetch_ready_skips_dangling_content_ref() {
        let conn = test_conn();
        let id = insert(&conn, &NewRequest::new("img", RequestKind::ImagePrompt), at(1)).unwrap();
        complete_with_content(&conn, id, RequestKind::ImagePrompt);

        // Point the row at content that does not exist, bypassing the FK.
        conn.execute_batch("PRAGMA foreign_keys=OFF;").unwrap();
        conn.execute("UPDATE requests SET content_ref = 999 WHERE id = ?1", [id])
            .unwrap();

        assert!(fetch_ready(&conn, &RequestKind::ImagePrompt, 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_conditional_update_only_wins_once() {
        let conn = test_conn();
        let id = insert(&conn, &NewRequest::new("t", RequestKind::Text), at(1)).unwrap();
        let claim = StatusUpdate {
            lifecycle: Some(LifecycleStatus::Processing),
            expect_lifecycle: vec![LifecycleStatus::Unprocessed],
            ..Default::default()
        };
        assert_eq!(update_status(&conn, id, &claim).unwrap(), 1);
        assert_eq!(update_status(&conn, id, &claim).unwrap(), 0);
    }

    #[test]
    fn test_error_message_set_keep_clear() {
        let conn = test_conn();
        let id = insert(&conn, &NewRequest::new("t", RequestKind::Text), at(1)).unwrap();

        update_status(
            &conn,
            id,
            &StatusUpdate {
                lifecycle: Some(LifecycleStatus::Processing),
                error_message: Some(ErrorUpdate::Set("boom")),
                ..Default::default()
            },
        )
        .unwrap();
        update_status(
            &conn,
            id,
            &StatusUpdate {
                lifecycle: Some(LifecycleStatus::Failed),
                ..Default::default()
            },
        )
        .unwrap();
        let row = find_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(row.error_message.as_deref(), Some("boom"));

        update_status(
            &conn,
            id,
            &StatusUpdate {
                error_message: Some(ErrorUpdate::Clear),
                ..Default::default()
            },
        )
        .unwrap();
        let row = find_by_id(&conn, id).unwrap().unwrap();
        assert!(row.error_message.is_none());
    }

    #[test]
    fn test_completed_at_is_written_once() {
        let conn = test_conn();
        let id = insert(&conn, &NewRequest::new("t", RequestKind::Text), at(1)).unwrap();
        for day in [5, 9] {
            update_status(
                &conn,
                id,
                &StatusUpdate {
                    completed_at: Some(at(day)),
                    ..Default::default()
                },
            )
            .unwrap();
        }
        let row = find_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(row.completed_at, Some(at(5)));
    }

    #[test]
    fn test_pending_without_content_violates_check() {
        let conn = test_conn();
        let id = insert(&conn, &NewRequest::new("t", RequestKind::ImagePrompt), at(1)).unwrap();
        let err = update_status(
            &conn,
            id,
            &StatusUpdate {
                lifecycle: Some(LifecycleStatus::Completed),
                artifact: Some(ArtifactStatus::Pending),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::Integrity { .. }));
    }

    #[test]
    fn test_empty_update_rejected() {
        let conn = test_conn();
        let id = insert(&conn, &NewRequest::new("t", RequestKind::Text), at(1)).unwrap();
        assert!(update_status(&conn, id, &StatusUpdate::default()).is_err());
    }

    #[test]
    fn test_query_with_filters_and_pagination() {
        let conn = test_conn();
        for day in 1..=6 {
            let kind = if day % 2 == 0 {
                RequestKind::ImagePrompt
            } else {
                RequestKind::Text
            };
            insert(&conn, &NewRequest::new(format!("r{}", day), kind), at(day)).unwrap();
        }

        let (rows, total) = query(&conn, &RequestFilter::default()).unwrap();
        assert_eq!(total, 6);
        assert_eq!(rows[0].request_text, "r6");

        let (rows, total) = query(
            &conn,
            &RequestFilter {
                kind: Some(RequestKind::ImagePrompt),
                limit: Some(2),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 3);
        assert_eq!(rows.len(), 2);
        assert!(rows
            .iter()
            .all(|r| r.request_kind == RequestKind::ImagePrompt));

        let (_, total) = query(
            &conn,
            &RequestFilter {
                lifecycle: Some(LifecycleStatus::Failed),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 0);
    }
}
