//! # ctxc-embed
//!
//! Embedding backends for Context Cache.
//!
//! The `Embedder` sum type selects a backend at startup (no string-keyed
//! lookup at runtime). Passages and queries are encoded asymmetrically:
//! `passage: ` and `query: ` prefixes are prepended before hashing or
//! calling the model, matching the e5 family convention.

pub mod hashed;
pub mod ollama;

pub use hashed::HashedEmbedder;
pub use ollama::{OllamaEmbedder, OLLAMA_URL};

use ctxc_core::{defaults, Result};

/// A batch of encoded vectors plus the identity of the model that made them.
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub model: String,
    pub dim: usize,
}

/// Embedding backend, chosen once at startup.
pub enum Embedder {
    /// Deterministic hashed features; the offline default.
    Hashed(HashedEmbedder),
    /// Local Ollama neural model.
    Ollama(OllamaEmbedder),
}

impl Embedder {
    /// The default deterministic backend.
    pub fn hashed_default() -> Self {
        Self::Hashed(HashedEmbedder::new(
            defaults::EMBED_MODEL,
            defaults::EMBED_DIMENSION,
        ))
    }

    /// Model identity stamped into every embedding row.
    pub fn model(&self) -> &str {
        match self {
            Self::Hashed(e) => e.model(),
            Self::Ollama(e) => e.model(),
        }
    }

    /// Vector dimension; the vector index is constructed from this.
    pub fn dim(&self) -> usize {
        match self {
            Self::Hashed(e) => e.dim(),
            Self::Ollama(e) => e.dim(),
        }
    }

    /// Encode passages for indexing (prefix `passage: `).
    pub async fn encode_passages(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        self.encode_with_prefix(texts, defaults::PASSAGE_PREFIX)
            .await
    }

    /// Encode queries for retrieval (prefix `query: `).
    pub async fn encode_queries(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        self.encode_with_prefix(texts, defaults::QUERY_PREFIX).await
    }

    async fn encode_with_prefix(&self, texts: &[String], prefix: &str) -> Result<EmbeddingBatch> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            let prefixed = format!("{prefix}{text}");
            let vector = match self {
                Self::Hashed(e) => e.encode(&prefixed),
                Self::Ollama(e) => e.encode(&prefixed).await?,
            };
            vectors.push(vector);
        }
        Ok(EmbeddingBatch {
            vectors,
            model: self.model().to_string(),
            dim: self.dim(),
        })
    }
}
