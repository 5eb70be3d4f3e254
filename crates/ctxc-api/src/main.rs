//! ctxc-server - HTTP API server for Context Cache.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ctxc_api::{router, AppState};
use ctxc_core::{Error, Result, Settings};
use ctxc_db::Database;
use ctxc_embed::{Embedder, HashedEmbedder, OllamaEmbedder, OLLAMA_URL};
use ctxc_ingest::{Chunker, IngestPipeline, Scheduler, SchedulerConfig, SourceWatcher};
use ctxc_search::{CrossEncoder, IndexManifest, Retriever, VectorIndex};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::load()?;
    info!(
        subsystem = "api",
        op = "startup",
        db_path = %settings.db_path.display(),
        "Starting context-cache"
    );

    let db = Database::connect(&settings.db_path).await?;

    // Collect soft-deleted documents past the retention window.
    match db.documents.gc_expired(settings.retention_days).await {
        Ok(0) => {}
        Ok(removed) => info!(subsystem = "api", op = "gc", removed, "Retention GC complete"),
        Err(e) => warn!(subsystem = "api", op = "gc", error = %e, "Retention GC failed"),
    }

    let embedder = Arc::new(build_embedder(&settings)?);

    // The index is a cache over the store; rebuild whenever the sidecar
    // manifest is missing or was built for another model.
    let manifest_path = settings
        .vectors_dir
        .as_ref()
        .map(|dir| dir.join("index.manifest.json"));
    let index = VectorIndex::rebuild(&db, embedder.model(), embedder.dim()).await?;
    if let Some(path) = &manifest_path {
        let manifest = IndexManifest {
            model: embedder.model().to_string(),
            dim: embedder.dim(),
            chunks: index.len(),
        };
        if let Err(e) = manifest.save(path) {
            warn!(subsystem = "api", error = %e, "Failed to write index manifest");
        }
    }
    let index = Arc::new(RwLock::new(index));

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
            workers: settings.effective_workers(),
            ..SchedulerConfig::default()
        },
    ));
    let scheduler_handle = scheduler.clone().start();

    let shutdown = CancellationToken::new();
    let watcher = SourceWatcher::new(db.clone(), scheduler.clone(), shutdown.clone());
    if let Err(e) = watcher.start().await {
        warn!(subsystem = "watcher", error = %e, "Watcher startup failed");
    }

    let retriever = Arc::new(Retriever::new(
        db.clone(),
        index.clone(),
        embedder,
        CrossEncoder::lexical(&settings.rerank_model),
    ));

    let state = AppState {
        db,
        retriever,
        scheduler,
        index,
    };
    let app = router(state);

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Config(format!("cannot bind {addr}: {e}")))?;
    info!(subsystem = "api", op = "listen", addr = %addr, "HTTP server ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!(subsystem = "api", op = "shutdown", "Shutting down");
            shutdown.cancel();
        })
        .await
        .map_err(Error::Io)?;

    let _ = scheduler_handle.shutdown().await;
    Ok(())
}

/// Select the embedding backend from configuration. Hashed models are the
/// deterministic default; anything else is treated as an Ollama model.
fn build_embedder(settings: &Settings) -> Result<Embedder> {
    if settings.embedding_model.starts_with("hashed/") {
        Ok(Embedder::Hashed(HashedEmbedder::new(
            settings.embedding_model.clone(),
            settings.embedding_dim,
        )))
    } else {
        Ok(Embedder::Ollama(OllamaEmbedder::new(
            OLLAMA_URL,
            settings.embedding_model.clone(),
            settings.embedding_dim,
        )?))
    }
}
