//! Artifact repository: SQL over the `artifacts` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{Map, Value};

use super::StorageError;
use crate::lifecycle::ArtifactKind;

/// A produced media file, stored relative to the media output root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub id: i64,
    pub request_id: i64,
    pub artifact_kind: ArtifactKind,
    pub file_path: String,
    pub preview_path: Option<String>,
    pub generation_metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Artifact {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            request_id: row.get("request_id")?,
            artifact_kind: row.get("artifact_kind")?,
            file_path: row.get("file_path")?,
            preview_path: row.get("preview_path")?,
            generation_metadata: row.get("generation_metadata")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewArtifact {
    pub request_id: i64,
    pub artifact_kind: ArtifactKind,
    pub file_path: String,
    pub preview_path: Option<String>,
    pub generation_metadata: Map<String, Value>,
}

pub fn insert(
    conn: &Connection,
    artifact: &NewArtifact,
    now: DateTime<Utc>,
) -> Result<i64, StorageError> {
    let metadata = serde_json::to_string(&artifact.generation_metadata)?;
    conn.execute(
        "INSERT INTO artifacts (request_id, artifact_kind, file_path, preview_path,
         generation_metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            artifact.request_id,
            artifact.artifact_kind,
            artifact.file_path,
            artifact.preview_path,
            metadata,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Artifact>, StorageError> {
    let row = conn
        .query_row(
            "SELECT * FROM artifacts WHERE id = ?1",
            params![id],
            Artifact::from_row,
        )
        .optional()?;
    Ok(row)
}

/// All artifacts of a request, newest first.
pub fn list_for_request(conn: &Connection, request_id: i64) -> Result<Vec<Artifact>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM artifacts WHERE request_id = ?1 ORDER BY created_at DESC, id DESC",
    )?;
    let rows = stmt
        .query_map(params![request_id], Artifact::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
fn count_for_request(conn: &Connection, request_id: i64) -> Result<u64, StorageError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM artifacts WHERE request_id = ?1",
        params![request_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

/// Merges `patch` into the artifact's metadata object and bumps `updated_at`.
/// Returns the number of rows affected (0 when the artifact does not exist).
pub fn patch_metadata(
    conn: &Connection,
    id: i64,
    patch: &Map<String, Value>,
    now: DateTime<Utc>,
) -> Result<usize, StorageError> {
    let Some(existing) = find_by_id(conn, id)? else {
        return Ok(0);
    };
    let mut merged = match existing.generation_metadata {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
    }
    let affected = conn.execute(
        "UPDATE artifacts SET generation_metadata = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, serde_json::to_string(&merged)?, now],
    )?;
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations;
    use chrono::TimeZone;
    use serde_json::json;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        migrations::run_all(&conn).unwrap();
        conn.execute(
            "INSERT INTO requests (request_text, request_kind, created_at)
             VALUES ('x', 'image_prompt', '2026-01-01 00:00:00+00:00')",
            [],
        )
        .unwrap();
        conn
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0).unwrap()
    }

    fn image(path: &str) -> NewArtifact {
        let mut metadata = Map::new();
        metadata.insert("seed".to_string(), json!(7));
        NewArtifact {
            request_id: 1,
            artifact_kind: ArtifactKind::Image,
            file_path: path.to_string(),
            preview_path: Some(path.to_string()),
            generation_metadata: metadata,
        }
    }

    #[test]
    fn test_insert_and_list_newest_first() {
        let conn = test_conn();
        let first = insert(&conn, &image("image/1_a/one.png"), at(0)).unwrap();
        let second = insert(&conn, &image("image/1_a/two.png"), at(5)).unwrap();

        let rows = list_for_request(&conn, 1).unwrap();
        let ids: Vec<i64> = rows.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![second, first]);
        assert_eq!(rows[0].generation_metadata, json!({"seed": 7}));
        assert_eq!(count_for_request(&conn, 1).unwrap(), 2);
    }

    #[test]
    fn test_absolute_path_is_integrity_error() {
        let conn = test_conn();
        let err = insert(&conn, &image("/tmp/out.png"), at(0)).unwrap_err();
        assert!(matches!(err, StorageError::Integrity { .. }));
    }

    #[test]
    fn test_patch_metadata_merges_and_bumps_updated_at() {
        let conn = test_conn();
        let id = insert(&conn, &image("image/1_a/one.png"), at(0)).unwrap();

        let mut patch = Map::new();
        patch.insert("rating".to_string(), json!("good"));
        patch.insert("seed".to_string(), json!(9));
        assert_eq!(patch_metadata(&conn, id, &patch, at(30)).unwrap(), 1);

        let row = find_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(row.generation_metadata, json!({"seed": 9, "rating": "good"}));
        assert_eq!(row.created_at, at(0));
        assert_eq!(row.updated_at, at(30));
    }

    #[test]
    fn test_patch_missing_artifact() {
        let conn = test_conn();
        assert_eq!(patch_metadata(&conn, 404, &Map::new(), at(0)).unwrap(), 0);
    }

    #[test]
    fn test_artifacts_cascade_with_request() {
        let conn = test_conn();
        insert(&conn, &image("image/1_a/one.png"), at(0)).unwrap();
        conn.execute("DELETE FROM requests WHERE id = 1", []).unwrap();
        assert_eq!(count_for_request(&conn, 1).unwrap(), 0);
    }
}
