//! Full-text search over chunk text.
//!
//! FTS5 `bm25()` scores are lower-is-better; this layer flips the sign so
//! every score leaving the store is higher-is-stronger, which the fusion
//! stage requires. The sign flip is strictly monotonic, so ranking is
//! unchanged.

use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use ctxc_core::{Error, QueryFilters, Result};

use crate::documents::parse_uuid;

/// Full-text search provider over the `chunks_fts` index.
pub struct FtsSearch {
    pool: SqlitePool,
}

impl FtsSearch {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// BM25 search returning `(chunk_id, score)` with higher-is-stronger
    /// scores, strongest first. Soft-deleted documents are included; the
    /// retriever down-weights them instead of dropping them here.
    pub async fn search(
        &self,
        query: &str,
        limit: i64,
        filters: Option<&QueryFilters>,
    ) -> Result<Vec<(Uuid, f32)>> {
        let match_expr = match build_match_expression(query) {
            Some(expr) => expr,
            None => return Ok(Vec::new()),
        };

        let mut sql = String::from(
            "SELECT c.id AS chunk_id, -bm25(chunks_fts) AS score
             FROM chunks_fts
             JOIN chunks c ON c.rowid = chunks_fts.rowid
             JOIN documents d ON d.id = c.document_id
             WHERE chunks_fts MATCH ?",
        );
        let mut binds: Vec<String> = vec![match_expr];

        if let Some(filters) = filters {
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
        }

        sql.push_str(" ORDER BY bm25(chunks_fts) ASC, c.id ASC LIMIT ?");

        let mut q = sqlx::query(&sql);
        for bind in &binds {
            q = q.bind(bind);
        }
        q = q.bind(limit);

        let rows = q.fetch_all(&self.pool).await.map_err(Error::Database)?;
        let hits: Vec<(Uuid, f32)> = rows
            .iter()
            .map(|row| {
                let id = parse_uuid(&row.get::<String, _>("chunk_id"))?;
                let score: f64 = row.get("score");
                Ok((id, score as f32))
            })
            .collect::<Result<_>>()?;

        debug!(
            subsystem = "db",
            component = "fts",
            op = "search",
            result_count = hits.len(),
            "FTS search complete"
        );
        Ok(hits)
    }
}

/// Turn free text into a safe FTS5 MATCH expression: each word token is
/// double-quoted (disabling operator syntax) and tokens are implicitly
/// AND-ed. Returns `None` when the query has no word tokens.
fn build_match_expression(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ingest_text_chunks, memory_db, sample_source};

    #[test]
    fn test_build_match_expression() {
        assert_eq!(
            build_match_expression("paragraph one").as_deref(),
            Some("\"paragraph\" \"one\"")
        );
        assert_eq!(
            build_match_expression("c'est déjà vu!").as_deref(),
            Some("\"c\" \"est\" \"déjà\" \"vu\"")
        );
        assert!(build_match_expression("  ... ").is_none());
    }

    #[tokio::test]
    async fn test_search_ranks_matching_chunk_first() {
        let db = memory_db().await;
        let source = sample_source(&db).await;
        let ids = ingest_text_chunks(
            &db,
            source.id,
            &[
                "the espresso machine hisses in the kitchen",
                "orbital mechanics of small satellites",
            ],
        )
        .await;

        let hits = db.fts.search("espresso machine", 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, ids[0]);
        assert!(hits[0].1 > 0.0, "score should be flipped to positive");
    }

    #[tokio::test]
    async fn test_search_is_case_folding() {
        let db = memory_db().await;
        let source = sample_source(&db).await;
        let ids = ingest_text_chunks(&db, source.id, &["Espresso Machines"]).await;

        let hits = db.fts.search("espresso", 10, None).await.unwrap();
        assert_eq!(hits[0].0, ids[0]);
    }

    #[tokio::test]
    async fn test_search_respects_mime_filter() {
        let db = memory_db().await;
        let source = sample_source(&db).await;
        ingest_text_chunks(&db, source.id, &["espresso beans"]).await;

        let filters = QueryFilters {
            mime: Some("application/pdf".into()),
            ..Default::default()
        };
        let hits = db.fts.search("espresso", 10, Some(&filters)).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_returns_nothing() {
        let db = memory_db().await;
        let hits = db.fts.search("", 10, None).await.unwrap();
        assert!(hits.is_empty());
    }
}
