//! HTTP handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio::sync::RwLock;
use uuid::Uuid;

use ctxc_core::{
    CreateSourceRequest, DeleteRequest, DeleteResponse, Error, ExportDocument, HealthResponse,
    IngestAccepted, IngestRequest, JobStatusResponse, OpContext, Provenance, QueryRequest,
    QueryResponse, RerankRequest, RerankResponse, Source, UpdateSourceRequest, UpsertTagsRequest,
    UpsertTagsResponse, WhyResponse,
};
use ctxc_db::Database;
use ctxc_ingest::{pipeline::chunk_ids_for_documents, Scheduler};
use ctxc_search::{Retriever, VectorIndex};

use crate::problem::ApiError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub retriever: Arc<Retriever>,
    pub scheduler: Arc<Scheduler>,
    pub index: Arc<RwLock<VectorIndex>>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

pub async fn create_source(
    State(state): State<AppState>,
    Json(req): Json<CreateSourceRequest>,
) -> Result<Json<Source>, ApiError> {
    let source = state.db.sources.upsert(&req).await?;
    Ok(Json(source))
}

pub async fn list_sources(State(state): State<AppState>) -> Result<Json<Vec<Source>>, ApiError> {
    Ok(Json(state.db.sources.list().await?))
}

pub async fn update_source(
    State(state): State<AppState>,
    Path(source_id): Path<Uuid>,
    Json(req): Json<UpdateSourceRequest>,
) -> Result<Json<Source>, ApiError> {
    Ok(Json(state.db.sources.update(source_id, &req).await?))
}

pub async fn delete_source(
    State(state): State<AppState>,
    Path(source_id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, ApiError> {
    state.db.sources.delete(source_id).await?;
    Ok(Json(DeleteResponse {
        status: "ok".to_string(),
        deleted: 1,
    }))
}

pub async fn trigger_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestAccepted>, ApiError> {
    let job_id = state.scheduler.enqueue_request(&req).await?;
    let job = state.db.jobs.get(job_id).await?;
    Ok(Json(IngestAccepted {
        job_id,
        status: job.status,
    }))
}

pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state.db.jobs.get(job_id).await?;
    Ok(Json(JobStatusResponse {
        job_id: job.id,
        status: job.status,
        stats: job.stats,
    }))
}

pub async fn run_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let ctx = OpContext::new();
    Ok(Json(state.retriever.retrieve(&ctx, &req).await?))
}

pub async fn run_rerank(
    State(state): State<AppState>,
    Json(req): Json<RerankRequest>,
) -> Result<Json<RerankResponse>, ApiError> {
    Ok(Json(state.retriever.rerank(&req)?))
}

pub async fn explain_query(
    State(state): State<AppState>,
    Path(query_id): Path<Uuid>,
) -> Result<Json<WhyResponse>, ApiError> {
    Ok(Json(state.retriever.why(query_id).await?))
}

pub async fn upsert_tags(
    State(state): State<AppState>,
    Json(req): Json<UpsertTagsRequest>,
) -> Result<Json<UpsertTagsResponse>, ApiError> {
    let updated = state
        .db
        .tags
        .upsert_document_tags(&req.document_ids, &req.tags)
        .await?;
    Ok(Json(UpsertTagsResponse { updated }))
}

pub async fn delete_documents(
    State(state): State<AppState>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let mut deleted = 0;

    if let Some(document_ids) = &req.document_ids {
        if req.hard {
            prune_index(&state, document_ids).await?;
        }
        deleted += state.db.documents.mark_deleted(document_ids, req.hard).await?;
    }
    if let Some(source_ids) = &req.source_ids {
        if req.hard {
            let mut doc_ids = Vec::new();
            for &source_id in source_ids {
                for seen in state.db.documents.seen_files(source_id).await? {
                    doc_ids.push(seen.document_id);
                }
            }
            prune_index(&state, &doc_ids).await?;
        }
        deleted += state
            .db
            .documents
            .mark_deleted_by_source(source_ids, req.hard)
            .await?;
    }

    Ok(Json(DeleteResponse {
        status: if deleted > 0 { "ok" } else { "noop" }.to_string(),
        deleted,
    }))
}

/// NDJSON export: one line per live document, carrying the document row,
/// a provenance record, and its chunks.
pub async fn export(State(state): State<AppState>) -> Result<Response, ApiError> {
    let sources: HashMap<Uuid, Source> = state
        .db
        .sources
        .list()
        .await?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();

    let mut lines = String::new();
    for document in state.db.documents.list_live().await? {
        let chunks = state.db.chunks.for_document(document.id).await?;
        let source = sources.get(&document.source_id);
        let provenance = Provenance {
            source_label: source.and_then(|s| s.label.clone()),
            path: document
                .external_id
                .clone()
                .or_else(|| source.map(|s| s.uri.clone())),
            modified_ts: document.modified_ts,
            ..Default::default()
        };
        let record = ExportDocument {
            document,
            provenance,
            chunks,
        };
        lines.push_str(&serde_json::to_string(&record).map_err(Error::from)?);
        lines.push('\n');
    }

    Ok(([(header::CONTENT_TYPE, "application/x-ndjson")], lines).into_response())
}

/// Soft-deleted chunks stay searchable (down-weighted); only a hard delete
/// drops their vectors from the index.
async fn prune_index(state: &AppState, document_ids: &[Uuid]) -> Result<(), ApiError> {
    let chunk_ids = chunk_ids_for_documents(&state.db, document_ids).await?;
    if !chunk_ids.is_empty() {
        let mut index = state.index.write().await;
        index.remove(&chunk_ids);
    }
    Ok(())
}
