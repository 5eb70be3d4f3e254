//! # ctxc-core
//!
//! Core types, traits, and configuration for the Context Cache engine.
//!
//! This crate provides the foundational data structures that the other
//! context-cache crates depend on: the error type, domain models and API
//! DTOs, default constants, settings loading, tokenizers, and the operation
//! context that carries cancellation and deadlines.

pub mod context;
pub mod defaults;
pub mod error;
pub mod ids;
pub mod logging;
pub mod models;
pub mod settings;
pub mod tokenizer;

// Re-export commonly used types at crate root
pub use context::OpContext;
pub use error::{Error, LoadErrorKind, Result};
pub use ids::new_v7;
pub use models::*;
pub use settings::Settings;
pub use tokenizer::{estimate_tokens, Tokenizer};
