//! Query orchestration: dense + sparse search, fusion, rerank, MMR,
//! provenance assembly, and the journal write.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use ctxc_core::{
    defaults, Error, OpContext, Provenance, QueryRequest, QueryResponse, RerankRequest,
    RerankResponse, Result, ResultItem, WhyResponse,
};
use ctxc_db::{Database, HydratedChunk};
use ctxc_embed::Embedder;

use crate::mmr::{mmr_select, MmrCandidate};
use crate::rerank::CrossEncoder;
use crate::rrf::{dense_only, rrf_fuse, FusedHit};
use crate::snippet::build_snippet;
use crate::vector_index::VectorIndex;

/// Retrieval engine shared by the HTTP handlers.
pub struct Retriever {
    db: Database,
    index: Arc<RwLock<VectorIndex>>,
    embedder: Arc<Embedder>,
    reranker: CrossEncoder,
}

impl Retriever {
    pub fn new(
        db: Database,
        index: Arc<RwLock<VectorIndex>>,
        embedder: Arc<Embedder>,
        reranker: CrossEncoder,
    ) -> Self {
        Self {
            db,
            index,
            embedder,
            reranker,
        }
    }

    /// Execute a query end to end and persist its snapshot.
    pub async fn retrieve(&self, ctx: &OpContext, req: &QueryRequest) -> Result<QueryResponse> {
        let start = Instant::now();
        validate(req)?;
        check_cancelled(ctx)?;

        // Store-level pre-filtering constrains both searches.
        let filter_ids = match &req.filters {
            Some(filters) if !filters.is_empty() => {
                Some(self.db.chunks.ids_matching_filters(filters).await?)
            }
            _ => None,
        };

        // Dense leg.
        let query_batch = self
            .embedder
            .encode_queries(std::slice::from_ref(&req.query))
            .await?;
        let query_vec = query_batch.vectors.into_iter().next().unwrap_or_default();
        let dense = {
            let index = self.index.read().await;
            index.search(&query_vec, defaults::TOP_K_DENSE, filter_ids.as_ref())?
        };

        // Sparse leg; BM25 scores already arrive higher-is-stronger.
        let sparse = if req.hybrid {
            self.db
                .fts
                .search(
                    &req.query,
                    defaults::TOP_K_SPARSE as i64,
                    req.filters.as_ref(),
                )
                .await?
        } else {
            Vec::new()
        };

        let mut fused = if req.hybrid {
            rrf_fuse(&dense, &sparse)
        } else {
            dense_only(&dense)
        };
        check_cancelled(ctx)?;

        let hydrated = self.hydrate(&fused).await?;

        // Deadline policy: a budget that expires before rerank/MMR start
        // degrades to the fusion ranking; once those stages have begun,
        // expiry is an error.
        let degraded = ctx.deadline_exceeded();
        let rerank_ran = req.rerank && !degraded;
        if rerank_ran {
            self.apply_rerank(&req.query, &mut fused, &hydrated);
            ctx.checkpoint()?;
        }

        // Soft-deleted chunks stay in, down-weighted before selection.
        downweight_soft_deleted(&mut fused, &hydrated, rerank_ran);

        let selected: Vec<FusedHit> = if degraded {
            fused.into_iter().take(req.k).collect()
        } else {
            let candidates = {
                let index = self.index.read().await;
                fused
                    .iter()
                    .map(|hit| MmrCandidate {
                        chunk_id: hit.chunk_id,
                        vector: index.get(&hit.chunk_id).map(<[f32]>::to_vec),
                    })
                    .collect::<Vec<_>>()
            };
            ctx.checkpoint()?;
            let picks = mmr_select(&query_vec, &candidates, req.k, req.mmr_lambda);
            picks.into_iter().map(|i| fused[i].clone()).collect()
        };

        let results = self.assemble(&req.query, &selected, &hydrated, req.return_text);

        // The snapshot is written atomically before the response leaves.
        let filters_json = serde_json::to_value(&req.filters)?;
        let query_id = self
            .db
            .journal
            .record(&req.query, &filters_json, rerank_ran, &results)
            .await?;

        info!(
            subsystem = "retrieval",
            component = "retriever",
            op = "retrieve",
            query_id = %query_id,
            dense_hits = dense.len(),
            sparse_hits = sparse.len(),
            result_count = results.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Query complete"
        );
        Ok(QueryResponse { query_id, results })
    }

    /// Replay a recorded query's frozen result set.
    pub async fn why(&self, query_id: Uuid) -> Result<WhyResponse> {
        self.db.journal.fetch_why(query_id).await
    }

    /// Score a free-standing candidate list with the cross-encoder.
    pub fn rerank(&self, req: &RerankRequest) -> Result<RerankResponse> {
        if req.query.trim().is_empty() {
            return Err(Error::validation("query", "query must be non-empty"));
        }
        let candidates: Vec<(String, String)> = req
            .candidates
            .iter()
            .map(|c| (c.id.clone(), c.text.clone()))
            .collect();
        let results = self
            .reranker
            .rerank_candidates(&req.query, &candidates, req.top_k);
        Ok(RerankResponse { results })
    }

    async fn hydrate(&self, fused: &[FusedHit]) -> Result<HashMap<Uuid, HydratedChunk>> {
        let ids: Vec<Uuid> = fused.iter().map(|h| h.chunk_id).collect();
        let rows = self.db.chunks.fetch_hydrated(&ids).await?;
        Ok(rows.into_iter().map(|h| (h.chunk.id, h)).collect())
    }

    /// Rerank the top candidates; their cross-encoder scores REPLACE the
    /// fusion scores, and everything else follows in fusion order.
    fn apply_rerank(
        &self,
        query: &str,
        fused: &mut Vec<FusedHit>,
        hydrated: &HashMap<Uuid, HydratedChunk>,
    ) {
        let cut = fused.len().min(defaults::RERANK_CANDIDATES);
        let tail = fused.split_off(cut);
        let mut head = std::mem::take(fused);

        for hit in head.iter_mut() {
            if let Some(chunk) = hydrated.get(&hit.chunk_id) {
                hit.score = self.reranker.score(query, &chunk.chunk.text);
            }
        }
        // Stable: equal rerank scores keep fusion order.
        head.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        head.extend(tail);
        *fused = head;
        debug!(
            subsystem = "retrieval",
            component = "rerank",
            op = "apply",
            result_count = cut,
            "Cross-encoder rerank applied"
        );
    }

    fn assemble(
        &self,
        query: &str,
        selected: &[FusedHit],
        hydrated: &HashMap<Uuid, HydratedChunk>,
        return_text: bool,
    ) -> Vec<ResultItem> {
        selected
            .iter()
            .filter_map(|hit| hydrated.get(&hit.chunk_id).map(|chunk| (hit, chunk)))
            .enumerate()
            .map(|(i, (hit, chunk))| {
                let meta = &chunk.chunk.meta;
                ResultItem {
                    rank: i + 1,
                    chunk_id: chunk.chunk.id,
                    document_id: chunk.chunk.document_id,
                    score: hit.score,
                    dense_score: hit.dense_score,
                    sparse_score: hit.sparse_score,
                    title: chunk.title.clone(),
                    snippet: build_snippet(&chunk.chunk.text, query),
                    text: return_text.then(|| chunk.chunk.text.clone()),
                    provenance: Provenance {
                        source_label: chunk.source_label.clone(),
                        path: chunk
                            .external_id
                            .clone()
                            .or_else(|| Some(chunk.source_uri.clone())),
                        page_from: meta.get("page_from").and_then(|v| v.as_i64()),
                        page_to: meta.get("page_to").and_then(|v| v.as_i64()),
                        section: meta
                            .get("section")
                            .and_then(|v| v.as_str())
                            .map(String::from),
                        modified_ts: chunk.modified_ts,
                    },
                    deep_link: format!(
                        "{}://doc/{}?chunk={}",
                        defaults::DEEP_LINK_SCHEME,
                        chunk.chunk.document_id,
                        chunk.chunk.id
                    ),
                }
            })
            .collect()
    }
}

fn check_cancelled(ctx: &OpContext) -> Result<()> {
    if ctx.is_cancelled() {
        return Err(Error::Cancelled("query cancelled".into()));
    }
    Ok(())
}

fn validate(req: &QueryRequest) -> Result<()> {
    if req.query.trim().is_empty() {
        return Err(Error::validation("query", "query must be non-empty"));
    }
    if req.k == 0 || req.k > defaults::TOP_K_MAX {
        return Err(Error::validation(
            "k",
            format!("k must be in 1..{}", defaults::TOP_K_MAX),
        ));
    }
    if !(0.0..=1.0).contains(&req.mmr_lambda) {
        return Err(Error::validation(
            "mmr_lambda",
            "mmr_lambda must be in 0..1",
        ));
    }
    Ok(())
}

/// Apply the soft-delete multiplier, then restore descending score order.
///
/// After rerank the list is two segments (reranked head, fusion-ordered
/// tail); each segment re-sorts independently so non-reranked items never
/// jump ahead of reranked ones.
fn downweight_soft_deleted(
    fused: &mut Vec<FusedHit>,
    hydrated: &HashMap<Uuid, HydratedChunk>,
    rerank_ran: bool,
) {
    let mut touched = false;
    for hit in fused.iter_mut() {
        if hydrated.get(&hit.chunk_id).is_some_and(|c| c.is_deleted) {
            hit.score *= defaults::SOFT_DELETE_DOWNWEIGHT;
            touched = true;
        }
    }
    if !touched {
        return;
    }

    let cut = if rerank_ran {
        fused.len().min(defaults::RERANK_CANDIDATES)
    } else {
        fused.len()
    };
    let mut tail = fused.split_off(cut);
    let mut head = std::mem::take(fused);
    head.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    tail.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    head.extend(tail);
    *fused = head;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxc_core::QueryFilters;

    fn req(query: &str) -> QueryRequest {
        QueryRequest {
            query: query.to_string(),
            k: 8,
            hybrid: true,
            filters: None,
            rerank: true,
            mmr_lambda: 0.5,
            return_text: true,
        }
    }

    #[test]
    fn test_validate_rejects_empty_query() {
        let err = validate(&req("   ")).unwrap_err();
        match err {
            Error::Validation { field, detail } => {
                assert_eq!(field, Some("query"));
                assert_eq!(detail, "query must be non-empty");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_out_of_range_k() {
        let mut r = req("q");
        r.k = 0;
        assert!(validate(&r).is_err());
        r.k = 51;
        assert!(validate(&r).is_err());
        r.k = 50;
        assert!(validate(&r).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_lambda() {
        let mut r = req("q");
        r.mmr_lambda = 1.5;
        assert!(validate(&r).is_err());
        r.mmr_lambda = 1.0;
        assert!(validate(&r).is_ok());
    }

    #[test]
    fn test_filters_serialize_into_journal_shape() {
        let filters = Some(QueryFilters {
            mime: Some("text/markdown".into()),
            ..Default::default()
        });
        let json = serde_json::to_value(&filters).unwrap();
        assert_eq!(json["mime"], "text/markdown");
    }
}
