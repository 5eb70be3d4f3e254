//! HTTP surface tests driven through the router with oneshot requests.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tower::ServiceExt;

use ctxc_api::{router, AppState};
use ctxc_db::test_support::memory_db;
use ctxc_db::Database;
use ctxc_embed::Embedder;
use ctxc_ingest::{Chunker, IngestPipeline, Scheduler, SchedulerConfig};
use ctxc_search::{CrossEncoder, Retriever, VectorIndex};

const NOTE: &str = "# A\n\nparagraph one.\n\n# B\n\nparagraph two.";

async fn build_app() -> (Router, AppState) {
    let db = memory_db().await;
    let embedder = Arc::new(Embedder::hashed_default());
    let index = Arc::new(RwLock::new(VectorIndex::flat(embedder.dim())));
    let pipeline = Arc::new(IngestPipeline::new(
        db.clone(),
        embedder.clone(),
        index.clone(),
        Chunker::approx(),
    ));
    let scheduler = Arc::new(Scheduler::new(
        db.clone(),
        pipeline,
        SchedulerConfig {
            workers: 1,
            poll_interval_ms: 10,
            queue_soft_cap: 16,
        },
    ));
    let retriever = Arc::new(Retriever::new(
        db.clone(),
        index.clone(),
        embedder,
        CrossEncoder::lexical("lexical/overlap-v1"),
    ));
    let state = AppState {
        db,
        retriever,
        scheduler,
        index,
    };
    (router(state.clone()), state)
}

async fn request_json(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    let request = match body {
        Some(value) => builder.body(Body::from(value.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn request_text(app: &Router, uri: &str) -> (StatusCode, Option<String>, String) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
}

/// Drain the queue synchronously so tests need no running worker loop.
async fn drain_jobs(db: &Database, state: &AppState) {
    while let Some(job) = db.jobs.claim_next().await.unwrap() {
        state.scheduler.execute_job(job).await;
    }
}

#[tokio::test]
async fn health_reports_ok() {
    let (app, _) = build_app().await;
    let (status, body) = request_json(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn empty_query_is_400_problem() {
    let (app, _) = build_app().await;
    let (status, body) = request_json(&app, "POST", "/query", Some(json!({"query": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["type"], "urn:ctxc:error:validation");
    assert_eq!(body["detail"], "query must be non-empty");
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn sources_roundtrip() {
    let (app, _) = build_app().await;
    let (status, created) = request_json(
        &app,
        "POST",
        "/sources",
        Some(json!({
            "kind": "folder",
            "uri": "file:///vault",
            "label": "vault",
            "include_glob": "**/*.md"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["label"], "vault");

    let (status, listed) = request_json(&app, "GET", "/sources", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let id = created["id"].as_str().unwrap();
    let (status, _) = request_json(
        &app,
        "PATCH",
        &format!("/sources/{id}"),
        Some(json!({"label": "renamed"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, deleted) =
        request_json(&app, "DELETE", &format!("/sources/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["status"], "ok");
}

#[tokio::test]
async fn unknown_source_is_404_problem() {
    let (app, _) = build_app().await;
    let (status, body) = request_json(
        &app,
        "DELETE",
        &format!("/sources/{}", uuid::Uuid::nil()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["type"], "urn:ctxc:error:not_found");
}

#[tokio::test]
async fn ingest_query_why_flow() {
    let (app, state) = build_app().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("note.md"), NOTE).unwrap();

    // Trigger ingest of the folder path.
    let (status, accepted) = request_json(
        &app,
        "POST",
        "/ingest",
        Some(json!({"paths": [dir.path().to_string_lossy()]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["status"], "queued");
    let job_id = accepted["job_id"].as_str().unwrap().to_string();

    drain_jobs(&state.db, &state).await;

    let (status, job) = request_json(&app, "GET", &format!("/ingest/{job_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "done");
    assert_eq!(job["stats"]["documents_added"], 1);
    assert_eq!(job["stats"]["chunks"], 2);

    // Query lands the section A chunk at rank 1.
    let (status, response) = request_json(
        &app,
        "POST",
        "/query",
        Some(json!({"query": "paragraph one", "k": 2, "hybrid": true, "rerank": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let results = response["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0]["rank"], 1);
    assert_eq!(results[0]["provenance"]["section"], "A");
    let deep_link = results[0]["deep_link"].as_str().unwrap();
    assert!(deep_link.starts_with("ctxc://doc/"));

    // The journal replays the same snapshot.
    let query_id = response["query_id"].as_str().unwrap();
    let (status, why) = request_json(&app, "GET", &format!("/why/{query_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(why["results"], response["results"]);
}

#[tokio::test]
async fn why_unknown_query_is_404() {
    let (app, _) = build_app().await;
    let (status, body) =
        request_json(&app, "GET", &format!("/why/{}", uuid::Uuid::nil()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["type"], "urn:ctxc:error:not_found");
}

#[tokio::test]
async fn rerank_endpoint_scores_candidates() {
    let (app, _) = build_app().await;
    let (status, body) = request_json(
        &app,
        "POST",
        "/rerank",
        Some(json!({
            "query": "espresso machine",
            "candidates": [
                {"id": "a", "text": "gardening tips"},
                {"id": "b", "text": "espresso machine maintenance"}
            ],
            "top_k": 2
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results[0]["id"], "b");
}

#[tokio::test]
async fn export_streams_one_json_line_per_document() {
    let (app, state) = build_app().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("note.md"), NOTE).unwrap();
    std::fs::write(dir.path().join("other.md"), "# C\n\nparagraph three.").unwrap();

    request_json(
        &app,
        "POST",
        "/ingest",
        Some(json!({"paths": [dir.path().to_string_lossy()]})),
    )
    .await;
    drain_jobs(&state.db, &state).await;

    let (status, content_type, body) = request_text(&app, "/export").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/x-ndjson"));

    let lines: Vec<&str> = body.lines().filter(|l| !l.trim().is_empty()).collect();
    assert_eq!(lines.len(), 2);
    for line in lines {
        let record: Value = serde_json::from_str(line).unwrap();
        assert!(record["document"]["sha256"].as_str().is_some());
        assert!(record["provenance"]["path"]
            .as_str()
            .unwrap()
            .ends_with(".md"));
        assert!(record["provenance"]["modified_ts"].as_i64().is_some());
        assert!(!record["chunks"].as_array().unwrap().is_empty());
    }

    // Soft-deleted documents drop out of the export.
    let sources = state.db.sources.list().await.unwrap();
    let seen = state.db.documents.seen_files(sources[0].id).await.unwrap();
    state
        .db
        .documents
        .mark_deleted(&[seen[0].document_id], false)
        .await
        .unwrap();
    let (_, _, body) = request_text(&app, "/export").await;
    assert_eq!(body.lines().filter(|l| !l.trim().is_empty()).count(), 1);
}

#[tokio::test]
async fn tags_and_delete_flow() {
    let (app, state) = build_app().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("note.md"), NOTE).unwrap();

    request_json(
        &app,
        "POST",
        "/ingest",
        Some(json!({"paths": [dir.path().to_string_lossy()]})),
    )
    .await;
    drain_jobs(&state.db, &state).await;

    let sources = state.db.sources.list().await.unwrap();
    let seen = state.db.documents.seen_files(sources[0].id).await.unwrap();
    let document_id = seen[0].document_id;

    let (status, tagged) = request_json(
        &app,
        "POST",
        "/upsert_tags",
        Some(json!({"document_ids": [document_id], "tags": ["inbox", "notes"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tagged["updated"], 2);

    // Soft delete keeps the chunks; hard delete prunes the index too.
    let (status, soft) = request_json(
        &app,
        "POST",
        "/delete",
        Some(json!({"document_ids": [document_id]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(soft["status"], "ok");
    assert_eq!(state.db.chunks.count().await.unwrap(), 2);
    assert_eq!(state.index.read().await.len(), 2);

    let (status, hard) = request_json(
        &app,
        "POST",
        "/delete",
        Some(json!({"document_ids": [document_id], "hard": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hard["status"], "ok");
    assert_eq!(state.db.chunks.count().await.unwrap(), 0);
    assert_eq!(state.index.read().await.len(), 0);
}
