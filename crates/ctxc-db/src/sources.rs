//! Source repository.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use ctxc_core::{new_v7, CreateSourceRequest, Error, Result, Source, SourceKind, UpdateSourceRequest};

use crate::time::{ms_to_datetime, now_ms};

/// Repository for registered content sources.
pub struct SourceRepository {
    pool: SqlitePool,
}

impl SourceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a source, or return the existing row when the URI is already
    /// registered (updating label and globs).
    pub async fn upsert(&self, req: &CreateSourceRequest) -> Result<Source> {
        let now = now_ms();
        if let Some(existing) = self.find_by_uri(&req.uri).await? {
            sqlx::query(
                "UPDATE sources SET label = COALESCE(?, label),
                        include_glob = COALESCE(?, include_glob),
                        exclude_glob = COALESCE(?, exclude_glob),
                        updated_at = ?
                 WHERE id = ?",
            )
            .bind(&req.label)
            .bind(&req.include_glob)
            .bind(&req.exclude_glob)
            .bind(now)
            .bind(existing.id.to_string())
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
            return self.get(existing.id).await;
        }

        let id = new_v7();
        sqlx::query(
            "INSERT INTO sources (id, kind, uri, label, include_glob, exclude_glob, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(req.kind.to_string())
        .bind(&req.uri)
        .bind(&req.label)
        .bind(&req.include_glob)
        .bind(&req.exclude_glob)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        self.get(id).await
    }

    /// Fetch one source by id.
    pub async fn get(&self, id: Uuid) -> Result<Source> {
        let row = sqlx::query(
            "SELECT id, kind, uri, label, include_glob, exclude_glob, created_at, updated_at
             FROM sources WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("source {}", id)))?;

        parse_source_row(&row)
    }

    /// Find a source by its URI.
    pub async fn find_by_uri(&self, uri: &str) -> Result<Option<Source>> {
        let row = sqlx::query(
            "SELECT id, kind, uri, label, include_glob, exclude_glob, created_at, updated_at
             FROM sources WHERE uri = ?",
        )
        .bind(uri)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(parse_source_row).transpose()
    }

    /// List all sources in creation order.
    pub async fn list(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query(
            "SELECT id, kind, uri, label, include_glob, exclude_glob, created_at, updated_at
             FROM sources ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(parse_source_row).collect()
    }

    /// Apply a partial update.
    pub async fn update(&self, id: Uuid, req: &UpdateSourceRequest) -> Result<Source> {
        // Verify existence first so callers get NotFound over a silent no-op.
        self.get(id).await?;
        sqlx::query(
            "UPDATE sources SET label = COALESCE(?, label),
                    include_glob = COALESCE(?, include_glob),
                    exclude_glob = COALESCE(?, exclude_glob),
                    updated_at = ?
             WHERE id = ?",
        )
        .bind(&req.label)
        .bind(&req.include_glob)
        .bind(&req.exclude_glob)
        .bind(now_ms())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        self.get(id).await
    }

    /// Delete a source; documents, chunks, and embeddings cascade.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("source {}", id)));
        }
        Ok(())
    }
}

fn parse_source_row(row: &sqlx::sqlite::SqliteRow) -> Result<Source> {
    let id: String = row.get("id");
    let kind: String = row.get("kind");
    Ok(Source {
        id: Uuid::parse_str(&id).map_err(|e| Error::Internal(format!("bad source id: {e}")))?,
        kind: kind
            .parse::<SourceKind>()
            .unwrap_or(SourceKind::Other),
        uri: row.get("uri"),
        label: row.get("label"),
        include_glob: row.get("include_glob"),
        exclude_glob: row.get("exclude_glob"),
        created_at: ms_to_datetime(row.get("created_at")),
        updated_at: ms_to_datetime(row.get("updated_at")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_db;

    #[tokio::test]
    async fn test_upsert_and_get() {
        let db = memory_db().await;
        let source = db
            .sources
            .upsert(&CreateSourceRequest {
                label: Some("notes".into()),
                kind: SourceKind::Folder,
                uri: "file:///home/u/notes".into(),
                include_glob: Some("**/*.md".into()),
                exclude_glob: None,
            })
            .await
            .unwrap();
        assert_eq!(source.kind, SourceKind::Folder);
        assert_eq!(source.label.as_deref(), Some("notes"));

        let fetched = db.sources.get(source.id).await.unwrap();
        assert_eq!(fetched.uri, "file:///home/u/notes");
    }

    #[tokio::test]
    async fn test_upsert_same_uri_reuses_row() {
        let db = memory_db().await;
        let req = CreateSourceRequest {
            label: None,
            kind: SourceKind::Folder,
            uri: "file:///vault".into(),
            include_glob: None,
            exclude_glob: None,
        };
        let a = db.sources.upsert(&req).await.unwrap();
        let b = db
            .sources
            .upsert(&CreateSourceRequest {
                label: Some("vault".into()),
                ..req
            })
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.label.as_deref(), Some("vault"));
        assert_eq!(db.sources.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let db = memory_db().await;
        let err = db.sources.get(Uuid::nil()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let db = memory_db().await;
        assert!(matches!(
            db.sources.delete(Uuid::nil()).await,
            Err(Error::NotFound(_))
        ));
    }
}
