//! Ollama embedding backend.
//!
//! Minimal client for a local Ollama instance's `/api/embeddings` endpoint.
//! Used when a neural model is available; the hashed backend remains the
//! deterministic default.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use ctxc_core::{defaults, Error, Result};

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// HTTP client for Ollama embeddings.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dim: usize,
}

impl OllamaEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dim: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(defaults::EMBED_TIMEOUT_SECS))
            .build()
            .map_err(Error::from)?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            dim,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Encode one text; the response vector is L2-normalised before return
    /// so the unit-norm invariant holds regardless of the model.
    pub async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .map_err(|e| Error::Embed(format!("ollama request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Embed(format!(
                "ollama returned {} for model {}",
                response.status(),
                self.model
            )));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embed(format!("ollama response decode failed: {e}")))?;

        if body.embedding.len() != self.dim {
            return Err(Error::Embed(format!(
                "model {} returned dim {}, expected {}",
                self.model,
                body.embedding.len(),
                self.dim
            )));
        }

        let mut vector = body.embedding;
        crate::hashed::normalize(&mut vector);
        debug!(
            subsystem = "embed",
            component = "ollama",
            op = "encode",
            model = %self.model,
            "Encoded text"
        );
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructor_stamps_identity() {
        let embedder = OllamaEmbedder::new(OLLAMA_URL, "nomic-embed-text", 768).unwrap();
        assert_eq!(embedder.model(), "nomic-embed-text");
        assert_eq!(embedder.dim(), 768);
    }

    #[tokio::test]
    async fn test_unreachable_server_maps_to_embed_error() {
        // Port 1 is never an Ollama instance.
        let embedder = OllamaEmbedder::new("http://127.0.0.1:1", "nomic-embed-text", 8).unwrap();
        let err = embedder.encode("hello").await.unwrap_err();
        assert!(matches!(err, Error::Embed(_)));
    }
}
