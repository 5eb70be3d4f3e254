//! Bounded worker pool executing ingest jobs.
//!
//! Jobs are persisted rows claimed in priority order (high > normal > low,
//! FIFO within a band). Up to `workers` jobs run concurrently; each carries
//! a cancellation token, and cancelling moves the job to `error` with
//! reason `cancelled`. The queue has a soft cap: watcher events beyond it
//! coalesce per path through deduplicated enqueue.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value as JsonValue};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ctxc_core::{
    defaults, CreateSourceRequest, Error, IngestJob, IngestRequest, IngestStats, JobPriority,
    OpContext, Result, SourceKind,
};
use ctxc_db::Database;

use crate::pipeline::{list_source_files, IngestPipeline};

/// Kind of task emitted by the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WatchTaskKind {
    Upsert,
    Delete,
}

impl WatchTaskKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }
}

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Concurrent worker slots; defaults to the CPU count.
    pub workers: usize,
    /// Poll interval while the queue is empty.
    pub poll_interval_ms: u64,
    /// Soft cap on queued jobs.
    pub queue_soft_cap: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            queue_soft_cap: defaults::JOB_QUEUE_SOFT_CAP,
        }
    }
}

/// Event emitted by the scheduler.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    JobStarted { job_id: Uuid },
    JobCompleted { job_id: Uuid },
    JobFailed { job_id: Uuid, error: String },
    WorkerStopped,
}

/// Handle for controlling a running scheduler.
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<SchedulerEvent>,
}

impl SchedulerHandle {
    /// Signal the scheduler to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))
    }

    /// Get a receiver for scheduler events.
    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_rx.resubscribe()
    }
}

/// The job scheduler.
pub struct Scheduler {
    db: Database,
    pipeline: Arc<IngestPipeline>,
    config: SchedulerConfig,
    event_tx: broadcast::Sender<SchedulerEvent>,
    cancellations: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl Scheduler {
    pub fn new(db: Database, pipeline: Arc<IngestPipeline>, config: SchedulerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            db,
            pipeline,
            config,
            event_tx,
            cancellations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_tx.subscribe()
    }

    /// Queue an ingest request from the API. Explicit paths and source ids
    /// both land in the payload; the worker resolves them when it runs.
    pub async fn enqueue_request(&self, req: &IngestRequest) -> Result<Uuid> {
        let priority = req.priority.unwrap_or_default();
        let mut payload = json!({});
        if let Some(paths) = &req.paths {
            if !paths.is_empty() {
                payload["paths"] = json!(paths);
            }
        }
        if let Some(sources) = &req.sources {
            if !sources.is_empty() {
                payload["source_ids"] = json!(sources);
            }
        }
        if payload.as_object().is_some_and(|o| o.is_empty()) {
            payload["all"] = json!(true);
        }
        let single_source = req
            .sources
            .as_ref()
            .and_then(|s| (s.len() == 1).then(|| s[0]));
        self.db.jobs.queue(single_source, priority, payload).await
    }

    /// Queue a watcher task. Same-path tasks coalesce while queued; past
    /// the soft cap everything coalesces, and a genuinely new path is
    /// still accepted (the cap is soft).
    pub async fn enqueue_watch_task(
        &self,
        source_id: Uuid,
        path: &std::path::Path,
        kind: WatchTaskKind,
    ) -> Result<Option<Uuid>> {
        let queued = self.db.jobs.queued_count().await?;
        if queued >= self.config.queue_soft_cap {
            warn!(
                subsystem = "scheduler",
                component = "queue",
                queued,
                cap = self.config.queue_soft_cap,
                "Ingest queue past soft cap, coalescing"
            );
        }
        let payload = json!({
            "source_id": source_id,
            "path": path.to_string_lossy(),
            "kind": kind.as_str(),
        });
        self.db
            .jobs
            .queue_deduplicated(Some(source_id), JobPriority::Normal, payload)
            .await
    }

    /// Cancel a job: trip its token when running, and record the terminal
    /// state.
    pub async fn cancel(&self, job_id: Uuid) -> Result<bool> {
        if let Some(token) = self.cancellations.lock().await.get(&job_id) {
            token.cancel();
        }
        self.db.jobs.cancel(job_id).await
    }

    /// Start the worker loop and return a control handle.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();
        let scheduler = self.clone();

        tokio::spawn(async move {
            scheduler.run(&mut shutdown_rx).await;
        });

        SchedulerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Claim-and-run loop. Claims up to `workers` jobs at a time and only
    /// sleeps while the queue is empty.
    async fn run(self: &Arc<Self>, shutdown_rx: &mut mpsc::Receiver<()>) {
        info!(
            subsystem = "scheduler",
            component = "worker",
            workers = self.config.workers,
            "Scheduler started"
        );
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!(
                    subsystem = "scheduler",
                    component = "worker",
                    "Scheduler received shutdown signal"
                );
                break;
            }

            let mut tasks = tokio::task::JoinSet::new();
            let mut claimed = 0;
            for _ in 0..self.config.workers {
                match self.db.jobs.claim_next().await {
                    Ok(Some(job)) => {
                        claimed += 1;
                        let scheduler = self.clone();
                        tasks.spawn(async move {
                            scheduler.execute_job(job).await;
                        });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(
                            subsystem = "scheduler",
                            component = "worker",
                            error = %e,
                            "Failed to claim job"
                        );
                        break;
                    }
                }
            }

            if claimed == 0 {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(
                            subsystem = "scheduler",
                            component = "worker",
                            "Scheduler received shutdown signal"
                        );
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                }
            } else {
                debug!(
                    subsystem = "scheduler",
                    component = "worker",
                    claimed,
                    "Processing job batch"
                );
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(
                            subsystem = "scheduler",
                            component = "worker",
                            error = ?e,
                            "Job task panicked"
                        );
                    }
                }
            }
        }

        let _ = self.event_tx.send(SchedulerEvent::WorkerStopped);
    }

    /// Execute one claimed job end to end.
    pub async fn execute_job(&self, job: IngestJob) {
        let start = Instant::now();
        let job_id = job.id;
        let token = CancellationToken::new();
        self.cancellations.lock().await.insert(job_id, token.clone());
        let ctx = OpContext::with_token(token);
        let _ = self.event_tx.send(SchedulerEvent::JobStarted { job_id });

        let mut stats = IngestStats::default();
        let outcome = self.run_payload(&ctx, &job.payload, &mut stats).await;
        stats.duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                if let Err(e) = self.db.jobs.complete(job_id, &stats).await {
                    error!(subsystem = "scheduler", job_id = %job_id, error = %e, "Failed to record completion");
                }
                info!(
                    subsystem = "scheduler",
                    component = "worker",
                    job_id = %job_id,
                    documents_added = stats.documents_added,
                    documents_skipped = stats.documents_skipped,
                    chunk_count = stats.chunks,
                    duration_ms = stats.duration_ms,
                    "Job completed"
                );
                let _ = self.event_tx.send(SchedulerEvent::JobCompleted { job_id });
            }
            Err(e) => {
                let reason = match &e {
                    Error::Cancelled(_) => "cancelled".to_string(),
                    other => other.to_string(),
                };
                if let Err(db_err) = self.db.jobs.fail(job_id, &reason, &stats).await {
                    error!(subsystem = "scheduler", job_id = %job_id, error = %db_err, "Failed to record failure");
                }
                warn!(
                    subsystem = "scheduler",
                    component = "worker",
                    job_id = %job_id,
                    error = %reason,
                    duration_ms = stats.duration_ms,
                    "Job failed"
                );
                let _ = self.event_tx.send(SchedulerEvent::JobFailed {
                    job_id,
                    error: reason,
                });
            }
        }
        self.cancellations.lock().await.remove(&job_id);
    }

    async fn run_payload(
        &self,
        ctx: &OpContext,
        payload: &JsonValue,
        stats: &mut IngestStats,
    ) -> Result<()> {
        // Watcher task: one path, upsert or delete.
        if let Some(path) = payload.get("path").and_then(JsonValue::as_str) {
            let kind = payload
                .get("kind")
                .and_then(JsonValue::as_str)
                .unwrap_or("upsert");
            let source_id = payload
                .get("source_id")
                .and_then(JsonValue::as_str)
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or_else(|| Error::Job("watch task without source_id".into()))?;

            if kind == "delete" {
                let removed = self.db.documents.soft_delete_by_external_id(path).await?;
                debug!(
                    subsystem = "scheduler",
                    component = "worker",
                    path,
                    removed,
                    "Watch delete applied"
                );
                return Ok(());
            }
            return self
                .pipeline
                .run_paths(ctx, source_id, &[PathBuf::from(path)], stats)
                .await;
        }

        // Explicit paths: each gets a source keyed by its own URI.
        if let Some(paths) = payload.get("paths").and_then(JsonValue::as_array) {
            for value in paths {
                let Some(path) = value.as_str() else { continue };
                let path = PathBuf::from(path);
                let source_id = self.ensure_source_for_path(&path).await?;
                let files = if path.is_dir() {
                    let source = self.db.sources.get(source_id).await?;
                    list_source_files(&source)?
                } else {
                    vec![path]
                };
                self.pipeline.run_paths(ctx, source_id, &files, stats).await?;
            }
            return Ok(());
        }

        // Source ids, or every registered source.
        let sources = if let Some(ids) = payload.get("source_ids").and_then(JsonValue::as_array) {
            let mut sources = Vec::new();
            for value in ids {
                let id = value
                    .as_str()
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(|| Error::Job(format!("bad source id {value}")))?;
                sources.push(self.db.sources.get(id).await?);
            }
            sources
        } else {
            self.db.sources.list().await?
        };

        for source in sources {
            let files = list_source_files(&source)?;
            info!(
                subsystem = "scheduler",
                component = "worker",
                source_id = %source.id,
                file_count = files.len(),
                "Ingesting source"
            );
            self.pipeline.run_paths(ctx, source.id, &files, stats).await?;
        }
        Ok(())
    }

    /// Find or register the source owning an explicit path.
    async fn ensure_source_for_path(&self, path: &std::path::Path) -> Result<Uuid> {
        let uri = format!("file://{}", path.display());
        if let Some(existing) = self.db.sources.find_by_uri(&uri).await? {
            return Ok(existing.id);
        }
        let source = self
            .db
            .sources
            .upsert(&CreateSourceRequest {
                label: path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(String::from),
                kind: if path.is_dir() {
                    SourceKind::Folder
                } else {
                    SourceKind::File
                },
                uri,
                include_glob: None,
                exclude_glob: None,
            })
            .await?;
        Ok(source.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_defaults() {
        let config = SchedulerConfig::default();
        assert!(config.workers >= 1);
        assert_eq!(config.poll_interval_ms, defaults::JOB_POLL_INTERVAL_MS);
        assert_eq!(config.queue_soft_cap, defaults::JOB_QUEUE_SOFT_CAP);
    }

    #[test]
    fn test_watch_task_kind_strings() {
        assert_eq!(WatchTaskKind::Upsert.as_str(), "upsert");
        assert_eq!(WatchTaskKind::Delete.as_str(), "delete");
    }
}
