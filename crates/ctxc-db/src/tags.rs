//! Tag repository.
//!
//! Tags are flat labels with many-to-many links to documents and chunks.
//! The graph lives only in join tables; in-memory code passes ids around.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use ctxc_core::{new_v7, Error, Result, Tag};

use crate::documents::parse_uuid;

/// Repository for tags and their links.
pub struct TagRepository {
    pool: SqlitePool,
}

impl TagRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get or create a tag by label.
    pub async fn get_or_create(&self, label: &str) -> Result<Tag> {
        if let Some(row) = sqlx::query("SELECT id, label FROM tags WHERE label = ?")
            .bind(label)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?
        {
            return Ok(Tag {
                id: parse_uuid(&row.get::<String, _>("id"))?,
                label: row.get("label"),
            });
        }

        let id = new_v7();
        sqlx::query("INSERT INTO tags (id, label) VALUES (?, ?)")
            .bind(id.to_string())
            .bind(label)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(Tag {
            id,
            label: label.to_string(),
        })
    }

    /// Attach every tag label to every document. Returns the number of new
    /// links created (existing links are left untouched).
    pub async fn upsert_document_tags(
        &self,
        document_ids: &[Uuid],
        labels: &[String],
    ) -> Result<u64> {
        let mut tag_ids = Vec::with_capacity(labels.len());
        for label in labels {
            tag_ids.push(self.get_or_create(label).await?.id);
        }

        let mut created = 0;
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        for document_id in document_ids {
            for tag_id in &tag_ids {
                let result = sqlx::query(
                    "INSERT OR IGNORE INTO document_tags (document_id, tag_id) VALUES (?, ?)",
                )
                .bind(document_id.to_string())
                .bind(tag_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
                created += result.rows_affected();
            }
        }
        tx.commit().await.map_err(Error::Database)?;
        Ok(created)
    }

    /// Labels attached to one document, sorted.
    pub async fn for_document(&self, document_id: Uuid) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT t.label FROM document_tags dt
             JOIN tags t ON t.id = dt.tag_id
             WHERE dt.document_id = ?
             ORDER BY t.label ASC",
        )
        .bind(document_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.iter().map(|r| r.get("label")).collect())
    }
}
