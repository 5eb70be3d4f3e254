//! Query journal.
//!
//! Every query and its ranked snapshot are written atomically before the
//! response leaves the retriever. The snapshot is immutable: `/why` replays
//! the frozen `ResultItem`s verbatim, even after the underlying documents
//! are gone.

use serde_json::Value as JsonValue;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use ctxc_core::{new_v7, Error, QueryRecord, Result, ResultItem, WhyResponse};

use crate::documents::parse_uuid;
use crate::time::{ms_to_datetime, now_ms};

/// Repository for the query journal.
pub struct QueryJournal {
    pool: SqlitePool,
}

impl QueryJournal {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist the query row and its ranked snapshot in one transaction,
    /// returning the new query id.
    pub async fn record(
        &self,
        query_text: &str,
        filters: &JsonValue,
        rerank_enabled: bool,
        results: &[ResultItem],
    ) -> Result<Uuid> {
        let query_id = new_v7();
        let now = now_ms();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        sqlx::query(
            "INSERT INTO queries (id, query, filters_json, rerank_enabled, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(query_id.to_string())
        .bind(query_text)
        .bind(filters.to_string())
        .bind(rerank_enabled as i64)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        for item in results {
            sqlx::query(
                "INSERT INTO query_results (query_id, chunk_id, rank, score, provenance_json)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(query_id.to_string())
            .bind(item.chunk_id.to_string())
            .bind(item.rank as i64)
            .bind(item.score as f64)
            .bind(serde_json::to_string(item)?)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }
        tx.commit().await.map_err(Error::Database)?;
        Ok(query_id)
    }

    /// Replay a recorded query's frozen result set.
    pub async fn fetch_why(&self, query_id: Uuid) -> Result<WhyResponse> {
        // Distinguish "unknown query" from "query with zero results".
        sqlx::query("SELECT id FROM queries WHERE id = ?")
            .bind(query_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?
            .ok_or_else(|| Error::NotFound(format!("query {}", query_id)))?;

        let rows = sqlx::query(
            "SELECT provenance_json FROM query_results WHERE query_id = ? ORDER BY rank ASC",
        )
        .bind(query_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let results: Vec<ResultItem> = rows
            .iter()
            .map(|row| {
                let snapshot: String = row.get("provenance_json");
                serde_json::from_str(&snapshot).map_err(Error::from)
            })
            .collect::<Result<_>>()?;

        Ok(WhyResponse { query_id, results })
    }

    /// Fetch the stored query row itself.
    pub async fn get_query(&self, query_id: Uuid) -> Result<QueryRecord> {
        let row = sqlx::query(
            "SELECT id, query, filters_json, rerank_enabled, created_at FROM queries WHERE id = ?",
        )
        .bind(query_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("query {}", query_id)))?;

        let filters: String = row.get("filters_json");
        Ok(QueryRecord {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            text: row.get("query"),
            filters: serde_json::from_str(&filters).unwrap_or(JsonValue::Null),
            rerank_enabled: row.get::<i64, _>("rerank_enabled") != 0,
            created_at: ms_to_datetime(row.get("created_at")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_db;
    use ctxc_core::Provenance;

    fn item(rank: usize, score: f32) -> ResultItem {
        let chunk_id = new_v7();
        let document_id = new_v7();
        ResultItem {
            rank,
            chunk_id,
            document_id,
            score,
            dense_score: Some(score),
            sparse_score: None,
            title: Some("Note".into()),
            snippet: "around the match".into(),
            text: Some("full chunk text".into()),
            provenance: Provenance {
                source_label: Some("vault".into()),
                path: Some("/vault/note.md".into()),
                section: Some("A".into()),
                ..Default::default()
            },
            deep_link: format!("ctxc://doc/{document_id}?chunk={chunk_id}"),
        }
    }

    #[tokio::test]
    async fn test_record_and_replay() {
        let db = memory_db().await;
        let results = vec![item(1, 0.9), item(2, 0.4)];
        let query_id = db
            .journal
            .record("espresso", &serde_json::json!({}), true, &results)
            .await
            .unwrap();

        let why = db.journal.fetch_why(query_id).await.unwrap();
        assert_eq!(why.results.len(), 2);
        assert_eq!(why.results[0].rank, 1);
        assert_eq!(why.results[0].snippet, "around the match");
        assert_eq!(why.results[1].chunk_id, results[1].chunk_id);

        let record = db.journal.get_query(query_id).await.unwrap();
        assert_eq!(record.text, "espresso");
        assert!(record.rerank_enabled);
    }

    #[tokio::test]
    async fn test_unknown_query_is_not_found() {
        let db = memory_db().await;
        assert!(matches!(
            db.journal.fetch_why(Uuid::nil()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_survives_with_no_chunk_rows() {
        // The journal has no FK to chunks; snapshots outlive their data.
        let db = memory_db().await;
        let results = vec![item(1, 0.7)];
        let query_id = db
            .journal
            .record("q", &serde_json::json!({}), false, &results)
            .await
            .unwrap();

        let why = db.journal.fetch_why(query_id).await.unwrap();
        assert_eq!(why.results[0].text.as_deref(), Some("full chunk text"));
    }
}
