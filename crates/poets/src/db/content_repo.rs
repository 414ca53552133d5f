//! Generated content repository: SQL over the `generated_content` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::StorageError;
use crate::lifecycle::RequestKind;

/// The Stage 1 payload of a request. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedContent {
    pub id: i64,
    pub content_kind: RequestKind,
    pub body: String,
    pub origin_request_id: i64,
    pub created_at: DateTime<Utc>,
}

impl GeneratedContent {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            content_kind: row.get("content_kind")?,
            body: row.get("body")?,
            origin_request_id: row.get("origin_request_id")?,
            created_at: row.get("created_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewContent {
    pub content_kind: RequestKind,
    pub body: String,
    pub origin_request_id: i64,
}

pub fn insert(
    conn: &Connection,
    content: &NewContent,
    created_at: DateTime<Utc>,
) -> Result<i64, StorageError> {
    conn.execute(
        "INSERT INTO generated_content (content_kind, body, origin_request_id, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            content.content_kind,
            content.body,
            content.origin_request_id,
            created_at
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<GeneratedContent>, StorageError> {
    let row = conn
        .query_row(
            "SELECT * FROM generated_content WHERE id = ?1",
            params![id],
            GeneratedContent::from_row,
        )
        .optional()?;
    Ok(row)
}
