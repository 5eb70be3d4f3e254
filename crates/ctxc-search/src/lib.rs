//! # ctxc-search
//!
//! The hybrid retrieval stack for Context Cache:
//! - a rebuildable vector index over unit-norm embeddings (cosine)
//! - Reciprocal Rank Fusion of the dense and sparse candidate lists
//! - cross-encoder reranking with a deterministic lexical fallback
//! - MMR diversification
//! - snippet extraction and provenance assembly
//! - the `Retriever` tying the stages together and journaling every query

pub mod mmr;
pub mod rerank;
pub mod retriever;
pub mod rrf;
pub mod snippet;
pub mod vector_index;

pub use mmr::{mmr_select, MmrCandidate};
pub use rerank::CrossEncoder;
pub use retriever::Retriever;
pub use rrf::{dense_only, rrf_fuse, FusedHit};
pub use snippet::build_snippet;
pub use vector_index::{IndexManifest, VectorIndex};
