//! # ctxc-api
//!
//! Thin axum adapter over the Context Cache engine. Routes match the
//! engine's pinned HTTP contract; all domain logic lives in the lower
//! crates.

pub mod handlers;
pub mod problem;

use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub use handlers::AppState;
pub use problem::{ApiError, Problem};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/sources", post(handlers::create_source))
        .route("/sources", get(handlers::list_sources))
        .route("/sources/:source_id", patch(handlers::update_source))
        .route("/sources/:source_id", delete(handlers::delete_source))
        .route("/ingest", post(handlers::trigger_ingest))
        .route("/ingest/:job_id", get(handlers::job_status))
        .route("/query", post(handlers::run_query))
        .route("/rerank", post(handlers::run_rerank))
        .route("/why/:query_id", get(handlers::explain_query))
        .route("/upsert_tags", post(handlers::upsert_tags))
        .route("/delete", post(handlers::delete_documents))
        .route("/export", get(handlers::export))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
