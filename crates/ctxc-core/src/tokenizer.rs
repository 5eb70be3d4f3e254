//! Token counting for chunk sizing and rerank truncation.
//!
//! Two interchangeable backends: a tiktoken BPE (accurate, matches common
//! embedding models) and a fast `ceil(chars / 4)` approximation. The active
//! choice is recorded in chunk metadata so re-ingest stays reproducible.

use crate::error::{Error, Result};

/// Characters-per-token ratio used by the approximate counter.
const APPROX_CHARS_PER_TOKEN: usize = 4;

/// Token counter used by the chunker and reranker.
pub enum Tokenizer {
    /// Byte-pair encoding via tiktoken (cl100k_base).
    Bpe {
        bpe: tiktoken_rs::CoreBPE,
        name: String,
    },
    /// `ceil(char_count / 4)` approximation.
    Approx,
}

impl Tokenizer {
    /// Construct the BPE tokenizer used by common embedding models.
    pub fn bpe() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| Error::Internal(format!("Failed to initialize cl100k_base: {}", e)))?;
        Ok(Self::Bpe {
            bpe,
            name: "cl100k_base".to_string(),
        })
    }

    /// Construct the approximate tokenizer.
    pub fn approx() -> Self {
        Self::Approx
    }

    /// Count tokens in the given text.
    pub fn count(&self, text: &str) -> usize {
        match self {
            Self::Bpe { bpe, .. } => bpe.encode_ordinary(text).len(),
            Self::Approx => estimate_tokens(text),
        }
    }

    /// Truncate text to at most `max_tokens` tokens.
    ///
    /// The approximate backend truncates at the corresponding char count;
    /// both backends respect UTF-8 boundaries.
    pub fn truncate(&self, text: &str, max_tokens: usize) -> String {
        match self {
            Self::Bpe { bpe, .. } => {
                let tokens = bpe.encode_ordinary(text);
                if tokens.len() <= max_tokens {
                    return text.to_string();
                }
                bpe.decode(tokens[..max_tokens].to_vec())
                    .unwrap_or_else(|_| take_chars(text, max_tokens * APPROX_CHARS_PER_TOKEN))
            }
            Self::Approx => {
                let max_chars = max_tokens * APPROX_CHARS_PER_TOKEN;
                if text.chars().count() <= max_chars {
                    text.to_string()
                } else {
                    take_chars(text, max_chars)
                }
            }
        }
    }

    /// Identifier recorded in chunk metadata.
    pub fn name(&self) -> &str {
        match self {
            Self::Bpe { name, .. } => name,
            Self::Approx => "approx-4cpt",
        }
    }
}

/// Quickly estimate token count as `ceil(char_count / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(APPROX_CHARS_PER_TOKEN)
}

fn take_chars(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}
