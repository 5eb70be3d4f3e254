//! Maximal Marginal Relevance selection.
//!
//! Greedy diversification over embedding cosines: at each step pick
//! `argmax λ·sim(q, i) − (1−λ)·max_{j∈selected} sim(i, j)`. With λ ≥ 1 the
//! diversity term vanishes, so selection degenerates to the incoming
//! relevance order and is skipped.

use uuid::Uuid;

/// One candidate entering selection. Candidates without a vector (not in
/// the index, e.g. a different model) score zero similarity everywhere.
#[derive(Debug, Clone)]
pub struct MmrCandidate {
    pub chunk_id: Uuid,
    pub vector: Option<Vec<f32>>,
}

/// Select up to `k` candidate indices in MMR order.
///
/// The input order encodes relevance ranking and is used as the stable
/// tie-break: on equal marginal scores the earlier candidate wins.
pub fn mmr_select(
    query_vec: &[f32],
    candidates: &[MmrCandidate],
    k: usize,
    lambda: f32,
) -> Vec<usize> {
    if candidates.is_empty() || k == 0 {
        return Vec::new();
    }
    if lambda >= 1.0 {
        return (0..candidates.len().min(k)).collect();
    }

    let relevance: Vec<f32> = candidates
        .iter()
        .map(|c| c.vector.as_deref().map_or(0.0, |v| dot(query_vec, v)))
        .collect();

    let mut selected: Vec<usize> = Vec::with_capacity(k);
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while selected.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (pos, &idx) in remaining.iter().enumerate() {
            let diversity = selected
                .iter()
                .map(|&chosen| pair_sim(&candidates[idx], &candidates[chosen]))
                .fold(0.0_f32, f32::max);
            let score = lambda * relevance[idx] - (1.0 - lambda) * diversity;
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }
        selected.push(remaining.remove(best_pos));
    }
    selected
}

fn pair_sim(a: &MmrCandidate, b: &MmrCandidate) -> f32 {
    match (&a.vector, &b.vector) {
        (Some(va), Some(vb)) => dot(va, vb),
        _ => 0.0,
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn cand(n: u128, v: Vec<f32>) -> MmrCandidate {
        MmrCandidate {
            chunk_id: uid(n),
            vector: Some(v),
        }
    }

    #[test]
    fn test_lambda_one_keeps_relevance_order() {
        let candidates = vec![
            cand(1, vec![1.0, 0.0]),
            cand(2, vec![1.0, 0.0]),
            cand(3, vec![0.0, 1.0]),
        ];
        let picked = mmr_select(&[1.0, 0.0], &candidates, 2, 1.0);
        assert_eq!(picked, vec![0, 1]);
    }

    #[test]
    fn test_low_lambda_diversifies_near_duplicates() {
        // Two near-identical vectors and one orthogonal; with λ=0.3 the
        // orthogonal candidate must displace the duplicate.
        let candidates = vec![
            cand(1, vec![1.0, 0.0]),
            cand(2, vec![0.999, 0.0447]),
            cand(3, vec![0.0, 1.0]),
        ];
        let picked = mmr_select(&[1.0, 0.0], &candidates, 2, 0.3);
        assert_eq!(picked[0], 0);
        assert_eq!(picked[1], 2);
    }

    #[test]
    fn test_first_pick_is_most_relevant() {
        let candidates = vec![cand(1, vec![0.0, 1.0]), cand(2, vec![1.0, 0.0])];
        let picked = mmr_select(&[1.0, 0.0], &candidates, 1, 0.5);
        assert_eq!(picked, vec![1]);
    }

    #[test]
    fn test_missing_vectors_do_not_panic() {
        let candidates = vec![
            MmrCandidate {
                chunk_id: uid(1),
                vector: None,
            },
            cand(2, vec![1.0, 0.0]),
        ];
        let picked = mmr_select(&[1.0, 0.0], &candidates, 2, 0.5);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0], 1);
    }

    #[test]
    fn test_k_larger_than_candidates() {
        let candidates = vec![cand(1, vec![1.0, 0.0])];
        assert_eq!(mmr_select(&[1.0, 0.0], &candidates, 10, 0.5).len(), 1);
        assert!(mmr_select(&[1.0, 0.0], &[], 10, 0.5).is_empty());
    }
}
