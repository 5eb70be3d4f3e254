//! Chunk repository.
//!
//! A document's chunks are always rewritten as a unit: the old rows (and
//! their embeddings, via cascade) are removed and the new set inserted in a
//! single transaction, so readers never observe a half-chunked document.

use std::collections::HashSet;

use serde_json::Value as JsonValue;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use ctxc_core::{Chunk, EmbeddingRecord, Error, QueryFilters, Result};

use crate::documents::parse_uuid;
use crate::embeddings::vector_to_blob;
use crate::time::now_ms;

/// A chunk joined with the document and source columns the retriever needs
/// for provenance assembly.
#[derive(Debug, Clone)]
pub struct HydratedChunk {
    pub chunk: Chunk,
    pub title: Option<String>,
    pub mime: String,
    pub modified_ts: Option<i64>,
    pub is_deleted: bool,
    pub external_id: Option<String>,
    pub source_label: Option<String>,
    pub source_uri: String,
}

/// Repository for chunks.
pub struct ChunkRepository {
    pool: SqlitePool,
}

impl ChunkRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Atomically replace a document's chunks and embeddings.
    ///
    /// Removing the prior chunks fires the FTS delete triggers and cascades
    /// the old embeddings; inserting the new rows fires the FTS insert
    /// triggers. A failure anywhere rolls the whole document back.
    pub async fn replace_for_document(
        &self,
        document_id: Uuid,
        chunks: &[Chunk],
        embeddings: &[EmbeddingRecord],
    ) -> Result<()> {
        let now = now_ms();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (id, document_id, ordinal, start_char, end_char, text, token_count, meta_json, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(chunk.id.to_string())
            .bind(document_id.to_string())
            .bind(chunk.ordinal)
            .bind(chunk.start_char)
            .bind(chunk.end_char)
            .bind(&chunk.text)
            .bind(chunk.token_count)
            .bind(chunk.meta.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        for embedding in embeddings {
            sqlx::query(
                "INSERT OR REPLACE INTO embeddings (chunk_id, model, dim, vector, style, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(embedding.chunk_id.to_string())
            .bind(&embedding.model)
            .bind(embedding.dim)
            .bind(vector_to_blob(&embedding.vector))
            .bind(embedding.style.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    /// All chunks of a document in ordinal order.
    pub async fn for_document(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT id, document_id, ordinal, start_char, end_char, text, token_count, meta_json
             FROM chunks WHERE document_id = ? ORDER BY ordinal ASC",
        )
        .bind(document_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(parse_chunk_row).collect()
    }

    /// Fetch chunks by id, joined with document and source provenance.
    /// Rows come back in no particular order; absent ids are skipped.
    pub async fn fetch_hydrated(&self, ids: &[Uuid]) -> Result<Vec<HydratedChunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT c.id, c.document_id, c.ordinal, c.start_char, c.end_char, c.text,
                    c.token_count, c.meta_json,
                    d.title, d.mime, d.modified_ts, d.is_deleted, d.external_id,
                    s.label AS source_label, s.uri AS source_uri
             FROM chunks c
             JOIN documents d ON d.id = c.document_id
             JOIN sources s ON s.id = d.source_id
             WHERE c.id IN ({placeholders})"
        );
        let mut q = sqlx::query(&sql);
        for id in ids {
            q = q.bind(id.to_string());
        }
        let rows = q.fetch_all(&self.pool).await.map_err(Error::Database)?;

        rows.iter()
            .map(|row| {
                Ok(HydratedChunk {
                    chunk: parse_chunk_row(row)?,
                    title: row.get("title"),
                    mime: row.get("mime"),
                    modified_ts: row.get("modified_ts"),
                    is_deleted: row.get::<i64, _>("is_deleted") != 0,
                    external_id: row.get("external_id"),
                    source_label: row.get("source_label"),
                    source_uri: row.get("source_uri"),
                })
            })
            .collect()
    }

    /// Chunk ids admitted by the store-level pre-filters.
    ///
    /// Soft-deleted documents are included on purpose; the retriever
    /// down-weights rather than excludes them.
    pub async fn ids_matching_filters(&self, filters: &QueryFilters) -> Result<HashSet<Uuid>> {
        let mut sql = String::from(
            "SELECT c.id FROM chunks c JOIN documents d ON d.id = c.document_id WHERE 1=1",
        );
        let mut binds: Vec<String> = Vec::new();

        if let Some(source_ids) = &filters.source_ids {
            sql.push_str(&format!(
                " AND d.source_id IN ({})",
                vec!["?"; source_ids.len()].join(",")
            ));
            binds.extend(source_ids.iter().map(Uuid::to_string));
        }
        if let Some(document_ids) = &filters.document_ids {
            sql.push_str(&format!(
                " AND d.id IN ({})",
                vec!["?"; document_ids.len()].join(",")
            ));
            binds.extend(document_ids.iter().map(Uuid::to_string));
        }
        if let Some(mime) = &filters.mime {
            sql.push_str(" AND d.mime = ?");
            binds.push(mime.clone());
        }
        if let Some(after) = filters.modified_after {
            sql.push_str(" AND d.modified_ts >= ?");
            binds.push(after.to_string());
        }
        if let Some(before) = filters.modified_before {
            sql.push_str(" AND d.modified_ts <= ?");
            binds.push(before.to_string());
        }
        if let Some(tags) = &filters.tags {
            if !tags.is_empty() {
                // Documents carrying every requested tag.
                sql.push_str(&format!(
                    " AND d.id IN (
                         SELECT dt.document_id FROM document_tags dt
                         JOIN tags t ON t.id = dt.tag_id
                         WHERE t.label IN ({})
                         GROUP BY dt.document_id
                         HAVING COUNT(DISTINCT t.label) >= {}
                     )",
                    vec!["?"; tags.len()].join(","),
                    tags.len()
                ));
                binds.extend(tags.iter().cloned());
            }
        }

        let mut q = sqlx::query(&sql);
        for bind in &binds {
            q = q.bind(bind);
        }
        let rows = q.fetch_all(&self.pool).await.map_err(Error::Database)?;

        rows.iter()
            .map(|r| parse_uuid(&r.get::<String, _>("id")))
            .collect()
    }

    /// Total number of stored chunks.
    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(count)
    }
}

fn parse_chunk_row(row: &sqlx::sqlite::SqliteRow) -> Result<Chunk> {
    let meta: String = row.get("meta_json");
    Ok(Chunk {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        document_id: parse_uuid(&row.get::<String, _>("document_id"))?,
        ordinal: row.get("ordinal"),
        start_char: row.get("start_char"),
        end_char: row.get("end_char"),
        text: row.get("text"),
        token_count: row.get("token_count"),
        meta: serde_json::from_str(&meta).unwrap_or(JsonValue::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_db, sample_document, sample_source};
    use ctxc_core::{new_v7, EmbeddingStyle};

    fn make_chunk(document_id: Uuid, ordinal: i64, text: &str, start: i64) -> Chunk {
        Chunk {
            id: new_v7(),
            document_id,
            ordinal,
            start_char: start,
            end_char: start + text.len() as i64,
            text: text.to_string(),
            token_count: (text.len() as i64 / 4).max(1),
            meta: serde_json::json!({}),
        }
    }

    fn make_embedding(chunk_id: Uuid) -> EmbeddingRecord {
        EmbeddingRecord {
            chunk_id,
            model: "hashed/test-4".into(),
            dim: 4,
            vector: vec![1.0, 0.0, 0.0, 0.0],
            style: EmbeddingStyle::Dense,
        }
    }

    #[tokio::test]
    async fn test_replace_for_document_roundtrip() {
        let db = memory_db().await;
        let source = sample_source(&db).await;
        let doc_id = sample_document(&db, source.id, "h1", "alpha beta").await;

        let chunks = vec![
            make_chunk(doc_id, 0, "alpha", 0),
            make_chunk(doc_id, 1, "beta", 6),
        ];
        let embeddings: Vec<_> = chunks.iter().map(|c| make_embedding(c.id)).collect();
        db.chunks
            .replace_for_document(doc_id, &chunks, &embeddings)
            .await
            .unwrap();

        let stored = db.chunks.for_document(doc_id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].ordinal, 0);
        assert_eq!(stored[1].text, "beta");
    }

    #[tokio::test]
    async fn test_replace_removes_prior_chunks() {
        let db = memory_db().await;
        let source = sample_source(&db).await;
        let doc_id = sample_document(&db, source.id, "h1", "alpha beta").await;

        let first = vec![make_chunk(doc_id, 0, "alpha beta", 0)];
        let first_embeds: Vec<_> = first.iter().map(|c| make_embedding(c.id)).collect();
        db.chunks
            .replace_for_document(doc_id, &first, &first_embeds)
            .await
            .unwrap();

        let second = vec![
            make_chunk(doc_id, 0, "alpha", 0),
            make_chunk(doc_id, 1, "beta", 6),
        ];
        let second_embeds: Vec<_> = second.iter().map(|c| make_embedding(c.id)).collect();
        db.chunks
            .replace_for_document(doc_id, &second, &second_embeds)
            .await
            .unwrap();

        let stored = db.chunks.for_document(doc_id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|c| c.id != first[0].id));
        assert_eq!(db.embeddings.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_fetch_hydrated_carries_provenance() {
        let db = memory_db().await;
        let source = sample_source(&db).await;
        let doc_id = sample_document(&db, source.id, "h1", "alpha").await;
        let chunks = vec![make_chunk(doc_id, 0, "alpha", 0)];
        db.chunks
            .replace_for_document(doc_id, &chunks, &[])
            .await
            .unwrap();

        let hydrated = db.chunks.fetch_hydrated(&[chunks[0].id]).await.unwrap();
        assert_eq!(hydrated.len(), 1);
        assert_eq!(hydrated[0].source_uri, source.uri);
        assert!(!hydrated[0].is_deleted);
    }

    #[tokio::test]
    async fn test_ids_matching_filters_by_mime() {
        let db = memory_db().await;
        let source = sample_source(&db).await;
        let doc_id = sample_document(&db, source.id, "h1", "alpha").await;
        let chunks = vec![make_chunk(doc_id, 0, "alpha", 0)];
        db.chunks
            .replace_for_document(doc_id, &chunks, &[])
            .await
            .unwrap();

        let hit = db
            .chunks
            .ids_matching_filters(&QueryFilters {
                mime: Some("text/markdown".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(hit.contains(&chunks[0].id));

        let miss = db
            .chunks
            .ids_matching_filters(&QueryFilters {
                mime: Some("application/pdf".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(miss.is_empty());
    }
}
