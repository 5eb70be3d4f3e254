//! Error types for context-cache.

use thiserror::Error;

/// Result type alias using context-cache's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of per-file loader failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadErrorKind {
    /// No loader registered for this extension/MIME type.
    UnsupportedMime,
    /// The bytes could not be decoded into text.
    DecodeError,
    /// The file decoded to empty text.
    Empty,
    /// Underlying filesystem failure.
    Io,
}

impl std::fmt::Display for LoadErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedMime => write!(f, "unsupported_mime"),
            Self::DecodeError => write!(f, "decode_error"),
            Self::Empty => write!(f, "empty"),
            Self::Io => write!(f, "io"),
        }
    }
}

/// Core error type for context-cache operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Invalid configuration; fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Per-file extraction failure; recorded on the job, ingest continues
    #[error("Load error ({kind}): {detail}")]
    Load { kind: LoadErrorKind, detail: String },

    /// Embedding backend failure
    #[error("Embedding error: {0}")]
    Embed(String),

    /// Vector index rejection; triggers rebuild-from-store on next start
    #[error("Index error: {0}")]
    Index(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request; surfaced as 400 with the violating field
    #[error("Validation error: {detail}")]
    Validation {
        field: Option<&'static str>,
        detail: String,
    },

    /// Query exceeded its time budget
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// Scheduler cancellation
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convenience constructor for validation failures.
    pub fn validation(field: &'static str, detail: impl Into<String>) -> Self {
        Error::Validation {
            field: Some(field),
            detail: detail.into(),
        }
    }

    /// Convenience constructor for loader failures.
    pub fn load(kind: LoadErrorKind, detail: impl Into<String>) -> Self {
        Error::Load {
            kind,
            detail: detail.into(),
        }
    }

    /// Stable machine-readable error kind, used as the RFC 7807 `type` suffix.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Database(_) => "database",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Load { .. } => "load",
            Error::Embed(_) => "embed",
            Error::Index(_) => "index",
            Error::NotFound(_) => "not_found",
            Error::Validation { .. } => "validation",
            Error::DeadlineExceeded => "deadline_exceeded",
            Error::Cancelled(_) => "cancelled",
            Error::Job(_) => "job",
            Error::Serialization(_) => "serialization",
            Error::Request(_) => "request",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
