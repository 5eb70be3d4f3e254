//! Document repository.
//!
//! The sha256 column is the content-addressing gate: re-ingesting bytes the
//! store already holds is a metadata-only update, never a chunk rewrite.

use serde_json::Value as JsonValue;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use ctxc_core::{new_v7, Document, Error, Result};

use crate::time::{ms_to_datetime, now_ms};

/// Fields needed to persist a freshly loaded document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub source_id: Uuid,
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub created_ts: Option<i64>,
    pub modified_ts: Option<i64>,
    pub mime: String,
    pub sha256: String,
    pub text: String,
    pub meta: JsonValue,
    pub size_bytes: i64,
}

/// Last-seen file state used by the watcher's reconciliation sweep.
#[derive(Debug, Clone)]
pub struct SeenFile {
    pub document_id: Uuid,
    pub external_id: String,
    pub modified_ts: Option<i64>,
    pub size_bytes: i64,
}

/// Repository for documents.
pub struct DocumentRepository {
    pool: SqlitePool,
}

impl DocumentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the document, or update metadata on an existing row with the
    /// same content hash. Returns `(document_id, was_new)`.
    ///
    /// A soft-deleted document re-ingested with identical bytes is revived
    /// in place; its chunks were preserved, so no rewrite is needed.
    pub async fn upsert(&self, doc: &NewDocument) -> Result<(Uuid, bool)> {
        let now = now_ms();
        let existing = sqlx::query("SELECT id FROM documents WHERE sha256 = ?")
            .bind(&doc.sha256)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        if let Some(row) = existing {
            let id: String = row.get("id");
            let id = parse_uuid(&id)?;
            sqlx::query(
                "UPDATE documents
                 SET external_id = COALESCE(?, external_id),
                     modified_ts = COALESCE(?, modified_ts),
                     meta_json = ?,
                     is_deleted = 0,
                     deleted_at = NULL,
                     updated_at = ?
                 WHERE id = ?",
            )
            .bind(&doc.external_id)
            .bind(doc.modified_ts)
            .bind(doc.meta.to_string())
            .bind(now)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
            return Ok((id, false));
        }

        let id = new_v7();
        sqlx::query(
            "INSERT INTO documents (
                 id, source_id, external_id, title, author, created_ts, modified_ts,
                 mime, sha256, text, meta_json, size_bytes, is_deleted, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(id.to_string())
        .bind(doc.source_id.to_string())
        .bind(&doc.external_id)
        .bind(&doc.title)
        .bind(&doc.author)
        .bind(doc.created_ts)
        .bind(doc.modified_ts)
        .bind(&doc.mime)
        .bind(&doc.sha256)
        .bind(&doc.text)
        .bind(doc.meta.to_string())
        .bind(doc.size_bytes)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok((id, true))
    }

    /// Fetch one document by id.
    pub async fn get(&self, id: Uuid) -> Result<Document> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))?;
        parse_document_row(&row)
    }

    /// Soft- or hard-delete documents by id. Returns the affected count.
    ///
    /// Soft delete marks `is_deleted` and stamps `deleted_at`, preserving
    /// chunks for the retention window. Hard delete removes chunks first so
    /// the FTS triggers fire, then the documents.
    pub async fn mark_deleted(&self, document_ids: &[Uuid], hard: bool) -> Result<u64> {
        if document_ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; document_ids.len()].join(",");
        let ids: Vec<String> = document_ids.iter().map(Uuid::to_string).collect();

        if hard {
            let mut tx = self.pool.begin().await.map_err(Error::Database)?;
            let delete_chunks =
                format!("DELETE FROM chunks WHERE document_id IN ({placeholders})");
            let mut q = sqlx::query(&delete_chunks);
            for id in &ids {
                q = q.bind(id);
            }
            q.execute(&mut *tx).await.map_err(Error::Database)?;

            let delete_documents = format!("DELETE FROM documents WHERE id IN ({placeholders})");
            let mut q = sqlx::query(&delete_documents);
            for id in &ids {
                q = q.bind(id);
            }
            let affected = q.execute(&mut *tx).await.map_err(Error::Database)?;
            tx.commit().await.map_err(Error::Database)?;
            Ok(affected.rows_affected())
        } else {
            let now = now_ms();
            let soft_delete = format!(
                "UPDATE documents SET is_deleted = 1, deleted_at = ?, updated_at = ?
                 WHERE id IN ({placeholders}) AND is_deleted = 0"
            );
            let mut q = sqlx::query(&soft_delete).bind(now).bind(now);
            for id in &ids {
                q = q.bind(id);
            }
            let affected = q.execute(&self.pool).await.map_err(Error::Database)?;
            Ok(affected.rows_affected())
        }
    }

    /// Delete or soft-delete every document belonging to the given sources.
    pub async fn mark_deleted_by_source(&self, source_ids: &[Uuid], hard: bool) -> Result<u64> {
        if source_ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; source_ids.len()].join(",");
        let ids: Vec<String> = source_ids.iter().map(Uuid::to_string).collect();

        let select_docs = format!("SELECT id FROM documents WHERE source_id IN ({placeholders})");
        let mut q = sqlx::query(&select_docs);
        for id in &ids {
            q = q.bind(id);
        }
        let rows = q.fetch_all(&self.pool).await.map_err(Error::Database)?;
        let doc_ids: Vec<Uuid> = rows
            .iter()
            .map(|r| parse_uuid(&r.get::<String, _>("id")))
            .collect::<Result<_>>()?;
        self.mark_deleted(&doc_ids, hard).await
    }

    /// Soft-delete the document whose `external_id` matches, if any.
    pub async fn soft_delete_by_external_id(&self, external_id: &str) -> Result<u64> {
        let now = now_ms();
        let affected = sqlx::query(
            "UPDATE documents SET is_deleted = 1, deleted_at = ?, updated_at = ?
             WHERE external_id = ? AND is_deleted = 0",
        )
        .bind(now)
        .bind(now)
        .bind(external_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(affected.rows_affected())
    }

    /// Hard-delete soft-deleted documents past the retention window.
    pub async fn gc_expired(&self, retention_days: i64) -> Result<u64> {
        let cutoff = now_ms() - retention_days * 24 * 60 * 60 * 1000;
        let rows = sqlx::query(
            "SELECT id FROM documents WHERE is_deleted = 1 AND deleted_at IS NOT NULL AND deleted_at < ?",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        let doc_ids: Vec<Uuid> = rows
            .iter()
            .map(|r| parse_uuid(&r.get::<String, _>("id")))
            .collect::<Result<_>>()?;
        self.mark_deleted(&doc_ids, true).await
    }

    /// Every live document, in creation order. Feeds the export surface.
    pub async fn list_live(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT * FROM documents WHERE is_deleted = 0 ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.iter().map(parse_document_row).collect()
    }

    /// Last-seen file state per live document of a source, keyed by
    /// external id (the file path for folder sources).
    pub async fn seen_files(&self, source_id: Uuid) -> Result<Vec<SeenFile>> {
        let rows = sqlx::query(
            "SELECT id, external_id, modified_ts, size_bytes
             FROM documents
             WHERE source_id = ? AND is_deleted = 0 AND external_id IS NOT NULL",
        )
        .bind(source_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter()
            .map(|row| {
                Ok(SeenFile {
                    document_id: parse_uuid(&row.get::<String, _>("id"))?,
                    external_id: row.get("external_id"),
                    modified_ts: row.get("modified_ts"),
                    size_bytes: row.get("size_bytes"),
                })
            })
            .collect()
    }
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Internal(format!("bad uuid in store: {e}")))
}

pub(crate) fn parse_document_row(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let meta: String = row.get("meta_json");
    Ok(Document {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        source_id: parse_uuid(&row.get::<String, _>("source_id"))?,
        external_id: row.get("external_id"),
        title: row.get("title"),
        author: row.get("author"),
        created_ts: row.get("created_ts"),
        modified_ts: row.get("modified_ts"),
        mime: row.get("mime"),
        sha256: row.get("sha256"),
        text: row.get("text"),
        meta: serde_json::from_str(&meta).unwrap_or(JsonValue::Null),
        size_bytes: row.get("size_bytes"),
        is_deleted: row.get::<i64, _>("is_deleted") != 0,
        created_at: ms_to_datetime(row.get("created_at")),
        updated_at: ms_to_datetime(row.get("updated_at")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_db, sample_source};

    fn new_doc(source_id: Uuid, sha: &str, text: &str) -> NewDocument {
        NewDocument {
            source_id,
            external_id: Some(format!("/tmp/{sha}.md")),
            title: Some("note".into()),
            author: None,
            created_ts: None,
            modified_ts: Some(1_000),
            mime: "text/markdown".into(),
            sha256: sha.into(),
            text: text.into(),
            meta: serde_json::json!({}),
            size_bytes: text.len() as i64,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_on_hash() {
        let db = memory_db().await;
        let source = sample_source(&db).await;

        let (id1, new1) = db
            .documents
            .upsert(&new_doc(source.id, "abc", "hello"))
            .await
            .unwrap();
        assert!(new1);

        let (id2, new2) = db
            .documents
            .upsert(&new_doc(source.id, "abc", "hello"))
            .await
            .unwrap();
        assert!(!new2);
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn test_upsert_updates_metadata_on_duplicate() {
        let db = memory_db().await;
        let source = sample_source(&db).await;

        let (id, _) = db
            .documents
            .upsert(&new_doc(source.id, "abc", "hello"))
            .await
            .unwrap();

        let mut dup = new_doc(source.id, "abc", "hello");
        dup.external_id = Some("/moved/hello.md".into());
        dup.modified_ts = Some(2_000);
        db.documents.upsert(&dup).await.unwrap();

        let doc = db.documents.get(id).await.unwrap();
        assert_eq!(doc.external_id.as_deref(), Some("/moved/hello.md"));
        assert_eq!(doc.modified_ts, Some(2_000));
    }

    #[tokio::test]
    async fn test_soft_delete_then_revive() {
        let db = memory_db().await;
        let source = sample_source(&db).await;
        let (id, _) = db
            .documents
            .upsert(&new_doc(source.id, "abc", "hello"))
            .await
            .unwrap();

        let affected = db.documents.mark_deleted(&[id], false).await.unwrap();
        assert_eq!(affected, 1);
        assert!(db.documents.get(id).await.unwrap().is_deleted);

        // Re-ingest of identical bytes revives the row.
        let (id2, was_new) = db
            .documents
            .upsert(&new_doc(source.id, "abc", "hello"))
            .await
            .unwrap();
        assert_eq!(id, id2);
        assert!(!was_new);
        assert!(!db.documents.get(id).await.unwrap().is_deleted);
    }

    #[tokio::test]
    async fn test_hard_delete_removes_row() {
        let db = memory_db().await;
        let source = sample_source(&db).await;
        let (id, _) = db
            .documents
            .upsert(&new_doc(source.id, "abc", "hello"))
            .await
            .unwrap();

        db.documents.mark_deleted(&[id], true).await.unwrap();
        assert!(matches!(
            db.documents.get(id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_gc_ignores_recent_soft_deletes() {
        let db = memory_db().await;
        let source = sample_source(&db).await;
        let (id, _) = db
            .documents
            .upsert(&new_doc(source.id, "abc", "hello"))
            .await
            .unwrap();
        db.documents.mark_deleted(&[id], false).await.unwrap();

        let removed = db.documents.gc_expired(30).await.unwrap();
        assert_eq!(removed, 0);
        // A zero-day retention collects it immediately.
        let removed = db.documents.gc_expired(-1).await.unwrap();
        assert_eq!(removed, 1);
    }
}
