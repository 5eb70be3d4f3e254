//! Deterministic hashed-feature embedder.
//!
//! Tokens are hashed into `dim` buckets and the resulting count vector is
//! L2-normalised. No model weights, no network, and identical `(model,
//! text)` inputs always produce identical vectors, which keeps re-ingest
//! and the test suite reproducible offline.

use sha2::{Digest, Sha256};

/// Hashed bag-of-words embedder.
#[derive(Debug, Clone)]
pub struct HashedEmbedder {
    model: String,
    dim: usize,
}

impl HashedEmbedder {
    pub fn new(model: impl Into<String>, dim: usize) -> Self {
        Self {
            model: model.into(),
            dim,
        }
    }

    /// Model identity stamped into embedding rows.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Encode one text into a unit-norm vector.
    pub fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dim];
        for token in tokenize(text) {
            let slot = hash_token(&token, self.dim);
            vector[slot] += 1.0;
        }
        normalize(&mut vector);
        vector
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn hash_token(token: &str, dim: usize) -> usize {
    let digest = Sha256::digest(token.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) % dim as u64) as usize
}

pub(crate) fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        let inv = 1.0 / norm;
        for value in vector.iter_mut() {
            *value *= inv;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn l2(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn test_encode_is_deterministic() {
        let embedder = HashedEmbedder::new("hashed/test-64", 64);
        let a = embedder.encode("quantum computing basics");
        let b = embedder.encode("quantum computing basics");
        assert_eq!(a, b);
    }

    #[test]
    fn test_encode_is_unit_norm() {
        let embedder = HashedEmbedder::new("hashed/test-64", 64);
        let v = embedder.encode("the quick brown fox");
        assert!((l2(&v) - 1.0).abs() <= 1e-6);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashedEmbedder::new("hashed/test-64", 64);
        let v = embedder.encode("");
        assert_eq!(l2(&v), 0.0);
        assert_eq!(v.len(), 64);
    }

    #[test]
    fn test_shared_tokens_raise_similarity() {
        let embedder = HashedEmbedder::new("hashed/test-256", 256);
        let a = embedder.encode("paragraph one about coffee");
        let b = embedder.encode("paragraph one about tea");
        let c = embedder.encode("satellite orbital mechanics");

        let dot = |x: &[f32], y: &[f32]| -> f32 { x.iter().zip(y).map(|(p, q)| p * q).sum() };
        assert!(dot(&a, &b) > dot(&a, &c));
    }

    #[test]
    fn test_case_folding() {
        let embedder = HashedEmbedder::new("hashed/test-64", 64);
        assert_eq!(embedder.encode("Espresso"), embedder.encode("espresso"));
    }
}
