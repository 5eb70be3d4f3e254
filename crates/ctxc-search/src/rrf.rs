//! Reciprocal Rank Fusion over the dense and sparse candidate lists.

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use ctxc_core::defaults::RRF_K;

/// A candidate after fusion, carrying both per-list scores for provenance.
#[derive(Debug, Clone)]
pub struct FusedHit {
    pub chunk_id: Uuid,
    /// RRF score, or the raw dense cosine in dense-only mode.
    pub score: f32,
    pub dense_score: Option<f32>,
    pub sparse_score: Option<f32>,
}

/// Fuse the two ranked lists with `score(c) = Σ 1 / (k + rank)` over
/// 1-based ranks. A candidate present in only one list contributes only
/// that term. Ties break by higher dense score, then ascending chunk id.
pub fn rrf_fuse(dense: &[(Uuid, f32)], sparse: &[(Uuid, f32)]) -> Vec<FusedHit> {
    let mut fused: HashMap<Uuid, FusedHit> = HashMap::new();

    for (rank, (chunk_id, cosine)) in dense.iter().enumerate() {
        let entry = fused.entry(*chunk_id).or_insert_with(|| FusedHit {
            chunk_id: *chunk_id,
            score: 0.0,
            dense_score: None,
            sparse_score: None,
        });
        entry.score += 1.0 / (RRF_K + (rank as f32 + 1.0));
        entry.dense_score = Some(*cosine);
    }
    for (rank, (chunk_id, bm25)) in sparse.iter().enumerate() {
        let entry = fused.entry(*chunk_id).or_insert_with(|| FusedHit {
            chunk_id: *chunk_id,
            score: 0.0,
            dense_score: None,
            sparse_score: None,
        });
        entry.score += 1.0 / (RRF_K + (rank as f32 + 1.0));
        entry.sparse_score = Some(*bm25);
    }

    let mut hits: Vec<FusedHit> = fused.into_values().collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let da = a.dense_score.unwrap_or(f32::NEG_INFINITY);
                let db = b.dense_score.unwrap_or(f32::NEG_INFINITY);
                db.partial_cmp(&da).unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });

    debug!(
        subsystem = "retrieval",
        component = "rrf",
        op = "fuse",
        dense_hits = dense.len(),
        sparse_hits = sparse.len(),
        result_count = hits.len(),
        "RRF fusion complete"
    );
    hits
}

/// Wrap a dense-only result list in the fused shape, keeping raw cosines
/// as the score.
pub fn dense_only(dense: &[(Uuid, f32)]) -> Vec<FusedHit> {
    dense
        .iter()
        .map(|(chunk_id, cosine)| FusedHit {
            chunk_id: *chunk_id,
            score: *cosine,
            dense_score: Some(*cosine),
            sparse_score: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn test_item_in_both_lists_outranks_single_list() {
        let dense = vec![(uid(1), 0.9), (uid(2), 0.8)];
        let sparse = vec![(uid(2), 5.0), (uid(3), 4.0)];

        let fused = rrf_fuse(&dense, &sparse);
        assert_eq!(fused[0].chunk_id, uid(2));
        let expected = 1.0 / 62.0 + 1.0 / 61.0;
        assert!((fused[0].score - expected).abs() < 1e-6);
        assert_eq!(fused[0].dense_score, Some(0.8));
        assert_eq!(fused[0].sparse_score, Some(5.0));
    }

    #[test]
    fn test_single_list_item_contributes_one_term() {
        let dense = vec![(uid(1), 0.9)];
        let fused = rrf_fuse(&dense, &[]);
        assert!((fused[0].score - 1.0 / 61.0).abs() < 1e-6);
        assert!(fused[0].sparse_score.is_none());
    }

    #[test]
    fn test_improving_rank_never_decreases_fused_rank() {
        // uid(2) moves from dense rank 3 to rank 1; its fused position
        // must not get worse.
        let sparse = vec![(uid(9), 3.0), (uid(2), 2.0)];
        let before = rrf_fuse(&[(uid(7), 0.9), (uid(8), 0.8), (uid(2), 0.7)], &sparse);
        let after = rrf_fuse(&[(uid(2), 0.9), (uid(7), 0.8), (uid(8), 0.7)], &sparse);

        let pos = |hits: &[FusedHit]| {
            hits.iter()
                .position(|h| h.chunk_id == uid(2))
                .expect("uid(2) present")
        };
        assert!(pos(&after) <= pos(&before));
    }

    #[test]
    fn test_tie_breaks_by_dense_score_then_id() {
        // uid(1) and uid(2) each appear only at rank 1 of one list, so
        // their RRF scores are identical; the dense one must win.
        let fused = rrf_fuse(&[(uid(2), 0.9)], &[(uid(1), 9.0)]);
        assert_eq!(fused[0].chunk_id, uid(2));

        // Identical everything: ascending id.
        let fused = rrf_fuse(&[], &[(uid(5), 1.0), (uid(4), 1.0)]);
        // rank 1 beats rank 2 regardless of id
        assert_eq!(fused[0].chunk_id, uid(5));
    }

    #[test]
    fn test_dense_only_preserves_cosine_scores() {
        let hits = dense_only(&[(uid(1), 0.75)]);
        assert_eq!(hits[0].score, 0.75);
        assert_eq!(hits[0].dense_score, Some(0.75));
        assert!(hits[0].sparse_score.is_none());
    }

    #[test]
    fn test_empty_inputs() {
        assert!(rrf_fuse(&[], &[]).is_empty());
    }
}
