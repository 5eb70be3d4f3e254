//! Cross-encoder reranking.
//!
//! The backend is a sum type chosen at startup. The lexical scorer is the
//! deterministic offline default: token-set similarity between the query
//! and the candidate, after truncating the candidate to the rerank token
//! budget. A neural cross-encoder slots in as another variant without
//! touching the retriever.

use std::collections::HashSet;

use ctxc_core::{defaults, RerankScore, Tokenizer};

/// Deterministic token-overlap scorer.
pub struct LexicalReranker {
    model: String,
    tokenizer: Tokenizer,
}

impl LexicalReranker {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            tokenizer: Tokenizer::approx(),
        }
    }

    fn score(&self, query: &str, text: &str) -> f32 {
        let truncated = self
            .tokenizer
            .truncate(text, defaults::RERANK_MAX_TOKENS);
        let query_tokens = token_set(query);
        let text_tokens = token_set(&truncated);
        if query_tokens.is_empty() || text_tokens.is_empty() {
            return 0.0;
        }
        let overlap = query_tokens.intersection(&text_tokens).count() as f32;
        let union = query_tokens.union(&text_tokens).count() as f32;
        overlap / union
    }
}

/// Cross-encoder backend, fixed at construction.
pub enum CrossEncoder {
    Lexical(LexicalReranker),
}

impl CrossEncoder {
    /// The deterministic offline backend.
    pub fn lexical(model: impl Into<String>) -> Self {
        Self::Lexical(LexicalReranker::new(model))
    }

    pub fn model(&self) -> &str {
        match self {
            Self::Lexical(r) => &r.model,
        }
    }

    /// Score one (query, candidate) pair; higher is more relevant.
    pub fn score(&self, query: &str, text: &str) -> f32 {
        match self {
            Self::Lexical(r) => r.score(query, text),
        }
    }

    /// Score a free-standing candidate list (the `/rerank` endpoint),
    /// strongest first, truncated to `top_k`. Ties keep input order.
    pub fn rerank_candidates(
        &self,
        query: &str,
        candidates: &[(String, String)],
        top_k: usize,
    ) -> Vec<RerankScore> {
        let mut scored: Vec<RerankScore> = candidates
            .iter()
            .map(|(id, text)| RerankScore {
                id: id.clone(),
                score: self.score(query, text),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        scored
    }
}

fn token_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_overlap_scores_highest() {
        let encoder = CrossEncoder::lexical("lexical/overlap-v1");
        let on_topic = encoder.score("paragraph one", "paragraph one.");
        let off_topic = encoder.score("paragraph one", "satellite telemetry");
        assert!(on_topic > off_topic);
        assert!((on_topic - 1.0).abs() < 1e-6);
        assert_eq!(off_topic, 0.0);
    }

    #[test]
    fn test_score_is_deterministic() {
        let encoder = CrossEncoder::lexical("lexical/overlap-v1");
        let a = encoder.score("coffee brewing", "how to brew coffee at home");
        let b = encoder.score("coffee brewing", "how to brew coffee at home");
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_inputs_score_zero() {
        let encoder = CrossEncoder::lexical("lexical/overlap-v1");
        assert_eq!(encoder.score("", "anything"), 0.0);
        assert_eq!(encoder.score("query", ""), 0.0);
    }

    #[test]
    fn test_rerank_candidates_orders_and_truncates() {
        let encoder = CrossEncoder::lexical("lexical/overlap-v1");
        let candidates = vec![
            ("a".to_string(), "nothing relevant here".to_string()),
            ("b".to_string(), "espresso machine".to_string()),
            ("c".to_string(), "espresso".to_string()),
        ];
        let ranked = encoder.rerank_candidates("espresso machine", &candidates, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].id, "b");
        assert_eq!(ranked[1].id, "c");
    }

    #[test]
    fn test_candidate_truncation_applies() {
        // The matching token sits past the 256-token budget, so it must
        // not contribute.
        let encoder = CrossEncoder::lexical("lexical/overlap-v1");
        let padding = "x ".repeat(2000);
        let text = format!("{padding} espresso");
        assert_eq!(encoder.score("espresso", &text), 0.0);
    }
}
