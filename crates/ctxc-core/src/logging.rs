//! Structured logging field name constants.
//!
//! All crates use these constants for consistent structured logging fields
//! so log queries work identically across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, operation completions |
//! | DEBUG | Decision points, intermediate values |
//! | TRACE | Per-item iteration (chunks, hits) |

/// Subsystem originating the log event.
/// Values: "api", "ingest", "retrieval", "db", "watcher", "scheduler"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pipeline", "chunker", "rrf", "vector_index", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "ingest_file", "retrieve", "claim_next", "rebuild"
pub const OPERATION: &str = "op";

/// Document UUID being operated on.
pub const DOCUMENT_ID: &str = "document_id";

/// Ingest job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Query UUID recorded in the journal.
pub const QUERY_ID: &str = "query_id";

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned by a search stage.
pub const RESULT_COUNT: &str = "result_count";

/// Number of chunks processed.
pub const CHUNK_COUNT: &str = "chunk_count";

/// Number of dense hits before fusion.
pub const DENSE_HITS: &str = "dense_hits";

/// Number of sparse (FTS) hits before fusion.
pub const SPARSE_HITS: &str = "sparse_hits";

/// Embedding model name.
pub const MODEL: &str = "model";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
