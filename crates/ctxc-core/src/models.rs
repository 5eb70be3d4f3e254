//! Core data models for context-cache.
//!
//! These types are shared across all context-cache crates and represent the
//! persisted entities plus the request/response DTOs of the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;
use crate::error::LoadErrorKind;

// =============================================================================
// SOURCES
// =============================================================================

/// Kind of a registered content source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Folder,
    File,
    Mbox,
    Eml,
    Markdown,
    NotionExport,
    Other,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Folder => write!(f, "folder"),
            Self::File => write!(f, "file"),
            Self::Mbox => write!(f, "mbox"),
            Self::Eml => write!(f, "eml"),
            Self::Markdown => write!(f, "markdown"),
            Self::NotionExport => write!(f, "notion_export"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "folder" => Ok(Self::Folder),
            "file" => Ok(Self::File),
            "mbox" => Ok(Self::Mbox),
            "eml" => Ok(Self::Eml),
            "markdown" => Ok(Self::Markdown),
            "notion_export" => Ok(Self::NotionExport),
            "other" => Ok(Self::Other),
            _ => Err(format!("Invalid source kind: {}", s)),
        }
    }
}

/// A registered content source (folder, mailbox, export, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub kind: SourceKind,
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_glob: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_glob: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// DOCUMENTS AND CHUNKS
// =============================================================================

/// A normalised document extracted from a source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub source_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Original creation timestamp in Unix milliseconds, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_ts: Option<i64>,
    /// Last-modified timestamp in Unix milliseconds, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_ts: Option<i64>,
    pub mime: String,
    /// SHA-256 of the raw bytes; uniquely identifies the content.
    pub sha256: String,
    pub text: String,
    pub meta: JsonValue,
    pub size_bytes: i64,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A contiguous span of a document's normalised text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    /// Position within the document: 0..N-1, gap-free.
    pub ordinal: i64,
    pub start_char: i64,
    pub end_char: i64,
    pub text: String,
    pub token_count: i64,
    pub meta: JsonValue,
}

/// Embedding style stored alongside a vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStyle {
    #[default]
    Dense,
    Sparse,
    Hybrid,
}

impl std::fmt::Display for EmbeddingStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dense => write!(f, "dense"),
            Self::Sparse => write!(f, "sparse"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// A stored embedding row, keyed by (chunk_id, model).
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub chunk_id: Uuid,
    pub model: String,
    pub dim: i64,
    pub vector: Vec<f32>,
    pub style: EmbeddingStyle,
}

// =============================================================================
// INGEST JOBS
// =============================================================================

/// Lifecycle of an ingest job. Transitions are monotonic:
/// queued -> running -> {done, error}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// Scheduling priority for ingest jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    /// Numeric ordering used by the claim query; higher claims first.
    pub fn as_i64(self) -> i64 {
        match self {
            Self::High => 2,
            Self::Normal => 1,
            Self::Low => 0,
        }
    }
}

/// One recorded per-file failure inside a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestError {
    pub path: String,
    pub kind: LoadErrorKind,
    pub detail: String,
}

/// Aggregated ingest statistics for a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStats {
    pub documents_added: u64,
    pub documents_skipped: u64,
    pub chunks: u64,
    pub duration_ms: u64,
    #[serde(default)]
    pub errors: Vec<IngestError>,
}

/// A persisted ingest job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestJob {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<Uuid>,
    pub status: JobStatus,
    pub priority: JobPriority,
    /// Job payload: paths and/or source ids to process.
    pub payload: JsonValue,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats: IngestStats,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// TAGS
// =============================================================================

/// A tag with a unique label, linked many-to-many to documents and chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub label: String,
}

// =============================================================================
// QUERY JOURNAL
// =============================================================================

/// A persisted query record; its result set is immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: Uuid,
    pub text: String,
    pub filters: JsonValue,
    pub rerank_enabled: bool,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// API DTOS
// =============================================================================

/// Request body for `POST /sources`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSourceRequest {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub kind: SourceKind,
    pub uri: String,
    #[serde(default)]
    pub include_glob: Option<String>,
    #[serde(default)]
    pub exclude_glob: Option<String>,
}

/// Request body for `PATCH /sources/{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSourceRequest {
    pub label: Option<String>,
    pub include_glob: Option<String>,
    pub exclude_glob: Option<String>,
}

/// Request body for `POST /ingest`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub sources: Option<Vec<Uuid>>,
    #[serde(default)]
    pub paths: Option<Vec<String>>,
    #[serde(default)]
    pub include_glob: Option<String>,
    #[serde(default)]
    pub exclude_glob: Option<String>,
    #[serde(default)]
    pub priority: Option<JobPriority>,
}

/// Response for `POST /ingest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestAccepted {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Response for `GET /ingest/{job_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub stats: IngestStats,
}

/// Pre-filters pushed down to the store before dense/sparse search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ids: Option<Vec<Uuid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_ids: Option<Vec<Uuid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Inclusive lower bound on `modified_ts`, Unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_after: Option<i64>,
    /// Inclusive upper bound on `modified_ts`, Unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_before: Option<i64>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.source_ids.is_none()
            && self.document_ids.is_none()
            && self.mime.is_none()
            && self.tags.is_none()
            && self.modified_after.is_none()
            && self.modified_before.is_none()
    }
}

fn default_k() -> usize {
    defaults::TOP_K_FINAL
}

fn default_true() -> bool {
    true
}

fn default_mmr_lambda() -> f32 {
    defaults::MMR_LAMBDA
}

/// Request body for `POST /query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_true")]
    pub hybrid: bool,
    #[serde(default)]
    pub filters: Option<QueryFilters>,
    #[serde(default = "default_true")]
    pub rerank: bool,
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f32,
    #[serde(default = "default_true")]
    pub return_text: bool,
}

/// Structural provenance attached to every result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_from: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_to: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_ts: Option<i64>,
}

/// One ranked retrieval result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultItem {
    /// 1-based rank within the result set.
    pub rank: usize,
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dense_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sparse_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub provenance: Provenance,
    /// `ctxc://doc/<document_id>?chunk=<chunk_id>`
    pub deep_link: String,
}

/// Response for `POST /query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query_id: Uuid,
    pub results: Vec<ResultItem>,
}

/// Response for `GET /why/{query_id}`: the frozen snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhyResponse {
    pub query_id: Uuid,
    pub results: Vec<ResultItem>,
}

/// One candidate passed to `POST /rerank`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankCandidate {
    pub id: String,
    pub text: String,
}

fn default_rerank_top_k() -> usize {
    10
}

/// Request body for `POST /rerank`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankRequest {
    pub query: String,
    pub candidates: Vec<RerankCandidate>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_rerank_top_k")]
    pub top_k: usize,
}

/// One scored rerank result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankScore {
    pub id: String,
    pub score: f32,
}

/// Response for `POST /rerank`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankResponse {
    pub results: Vec<RerankScore>,
}

/// Request body for `POST /upsert_tags`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertTagsRequest {
    pub document_ids: Vec<Uuid>,
    pub tags: Vec<String>,
}

/// Response for `POST /upsert_tags`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertTagsResponse {
    pub updated: u64,
}

/// Request body for `POST /delete`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub document_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub source_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub hard: bool,
}

/// Response for `POST /delete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub status: String,
    pub deleted: u64,
}

/// Response for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
}

/// One export record: a live document, its provenance, and its chunks.
/// `GET /export` emits one of these per NDJSON line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub document: Document,
    pub provenance: Provenance,
    pub chunks: Vec<Chunk>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_roundtrip() {
        for kind in [
            SourceKind::Folder,
            SourceKind::File,
            SourceKind::Mbox,
            SourceKind::Eml,
            SourceKind::Markdown,
            SourceKind::NotionExport,
            SourceKind::Other,
        ] {
            let s = kind.to_string();
            assert_eq!(s.parse::<SourceKind>().unwrap(), kind);
        }
        assert!("tarball".parse::<SourceKind>().is_err());
    }

    #[test]
    fn test_job_status_roundtrip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Done,
            JobStatus::Error,
        ] {
            assert_eq!(status.to_string().parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_job_priority_ordering() {
        assert!(JobPriority::High.as_i64() > JobPriority::Normal.as_i64());
        assert!(JobPriority::Normal.as_i64() > JobPriority::Low.as_i64());
    }

    #[test]
    fn test_query_request_defaults() {
        let req: QueryRequest = serde_json::from_str(r#"{"query":"hello"}"#).unwrap();
        assert_eq!(req.k, defaults::TOP_K_FINAL);
        assert!(req.hybrid);
        assert!(req.rerank);
        assert!(req.return_text);
        assert!((req.mmr_lambda - defaults::MMR_LAMBDA).abs() < f32::EPSILON);
        assert!(req.filters.is_none());
    }

    #[test]
    fn test_query_filters_is_empty() {
        assert!(QueryFilters::default().is_empty());
        let filters = QueryFilters {
            mime: Some("text/markdown".to_string()),
            ..Default::default()
        };
        assert!(!filters.is_empty());
    }

    #[test]
    fn test_result_item_serialization_skips_none() {
        let item = ResultItem {
            rank: 1,
            chunk_id: Uuid::nil(),
            document_id: Uuid::nil(),
            score: 0.5,
            dense_score: None,
            sparse_score: None,
            title: None,
            snippet: "hello".to_string(),
            text: None,
            provenance: Provenance::default(),
            deep_link: "ctxc://doc/x?chunk=y".to_string(),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert!(json.get("dense_score").is_none());
        assert!(json.get("text").is_none());
        assert_eq!(json["rank"], 1);
    }

    #[test]
    fn test_ingest_stats_default() {
        let stats = IngestStats::default();
        assert_eq!(stats.documents_added, 0);
        assert!(stats.errors.is_empty());
    }
}
