//! Embedding repository and vector blob encoding.
//!
//! Vectors are stored as little-endian f32 byte strings in the `embeddings`
//! blob column. That column is the canonical copy; the in-memory vector
//! index is a rebuildable cache over it.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use ctxc_core::{EmbeddingRecord, EmbeddingStyle, Error, Result};

use crate::documents::parse_uuid;
use crate::time::now_ms;

/// Encode a vector as little-endian f32 bytes.
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decode a little-endian f32 blob back into a vector.
pub fn blob_to_vector(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(Error::Internal(format!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Repository for stored embeddings.
pub struct EmbeddingRepository {
    pool: SqlitePool,
}

impl EmbeddingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace embeddings, one row per (chunk_id, model).
    pub async fn upsert(&self, embeddings: &[EmbeddingRecord]) -> Result<()> {
        let now = now_ms();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
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

    /// Every (chunk_id, vector) pair for a model; feeds index rebuilds.
    pub async fn load_all(&self, model: &str) -> Result<Vec<(Uuid, Vec<f32>)>> {
        let rows = sqlx::query("SELECT chunk_id, vector FROM embeddings WHERE model = ?")
            .bind(model)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        rows.iter()
            .map(|row| {
                let chunk_id = parse_uuid(&row.get::<String, _>("chunk_id"))?;
                let blob: Vec<u8> = row.get("vector");
                Ok((chunk_id, blob_to_vector(&blob)?))
            })
            .collect()
    }

    /// Fetch the stored rows for specific chunks under one model.
    pub async fn for_chunks(&self, chunk_ids: &[Uuid], model: &str) -> Result<Vec<EmbeddingRecord>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; chunk_ids.len()].join(",");
        let sql = format!(
            "SELECT chunk_id, model, dim, vector, style FROM embeddings
             WHERE model = ? AND chunk_id IN ({placeholders})"
        );
        let mut q = sqlx::query(&sql).bind(model);
        for id in chunk_ids {
            q = q.bind(id.to_string());
        }
        let rows = q.fetch_all(&self.pool).await.map_err(Error::Database)?;

        rows.iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("vector");
                let style: String = row.get("style");
                Ok(EmbeddingRecord {
                    chunk_id: parse_uuid(&row.get::<String, _>("chunk_id"))?,
                    model: row.get("model"),
                    dim: row.get("dim"),
                    vector: blob_to_vector(&blob)?,
                    style: match style.as_str() {
                        "sparse" => EmbeddingStyle::Sparse,
                        "hybrid" => EmbeddingStyle::Hybrid,
                        _ => EmbeddingStyle::Dense,
                    },
                })
            })
            .collect()
    }

    /// Total number of embedding rows.
    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM embeddings")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_roundtrip() {
        let vector = vec![0.25_f32, -1.5, 0.0, 3.75];
        let blob = vector_to_blob(&vector);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_vector(&blob).unwrap(), vector);
    }

    #[test]
    fn test_blob_rejects_misaligned_length() {
        assert!(blob_to_vector(&[0u8, 1, 2]).is_err());
    }

    #[test]
    fn test_empty_blob_is_empty_vector() {
        assert!(blob_to_vector(&[]).unwrap().is_empty());
    }
}
