//! Filesystem watcher.
//!
//! Each folder source gets a notify watcher running on a dedicated thread;
//! raw events cross into async land over an unbounded channel and are
//! debounced per path with a 500 ms quiet window, so a burst of writes to
//! one file coalesces into a single ingest task. On startup a
//! reconciliation sweep compares on-disk mtime+size against the store's
//! last-seen values to catch changes missed while offline.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ctxc_core::{defaults, Result, Source, SourceKind};
use ctxc_db::Database;

use crate::loaders::LoaderRegistry;
use crate::pipeline::{list_source_files, path_matches_source, source_root};
use crate::scheduler::{Scheduler, WatchTaskKind};

/// Per-path pending state with the debounce deadline.
#[derive(Debug)]
pub struct DebounceMap {
    quiet_window: Duration,
    pending: HashMap<PathBuf, (WatchTaskKind, Instant)>,
}

impl DebounceMap {
    pub fn new(quiet_window: Duration) -> Self {
        Self {
            quiet_window,
            pending: HashMap::new(),
        }
    }

    /// Record an event; a later event for the same path restarts its quiet
    /// window and the latest kind wins.
    pub fn record(&mut self, path: PathBuf, kind: WatchTaskKind, now: Instant) {
        self.pending.insert(path, (kind, now));
    }

    /// Drain entries whose quiet window has elapsed.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<(PathBuf, WatchTaskKind)> {
        let quiet = self.quiet_window;
        let ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, (_, at))| now.duration_since(*at) >= quiet)
            .map(|(path, _)| path.clone())
            .collect();
        let mut tasks = Vec::with_capacity(ready.len());
        for path in ready {
            if let Some((kind, _)) = self.pending.remove(&path) {
                tasks.push((path, kind));
            }
        }
        tasks.sort();
        tasks
    }

    /// Deadline of the earliest pending entry, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|(_, at)| *at + self.quiet_window)
            .min()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Watches every folder source and feeds the scheduler.
pub struct SourceWatcher {
    db: Database,
    scheduler: Arc<Scheduler>,
    shutdown: CancellationToken,
}

impl SourceWatcher {
    pub fn new(db: Database, scheduler: Arc<Scheduler>, shutdown: CancellationToken) -> Self {
        Self {
            db,
            scheduler,
            shutdown,
        }
    }

    /// Reconcile all folder sources, then spawn a watch loop per source.
    pub async fn start(&self) -> Result<()> {
        let sources = self.db.sources.list().await?;
        for source in sources {
            if source.kind != SourceKind::Folder {
                continue;
            }
            if let Err(e) = self.reconcile_source(&source).await {
                warn!(
                    subsystem = "watcher",
                    source_id = %source.id,
                    error = %e,
                    "Reconciliation sweep failed"
                );
            }
            self.spawn_watch_loop(source);
        }
        Ok(())
    }

    /// Compare on-disk state with last-seen documents and enqueue the
    /// differences. Files no loader understands are left alone, so they do
    /// not re-enqueue on every sweep.
    pub async fn reconcile_source(&self, source: &Source) -> Result<usize> {
        let registry = LoaderRegistry::new();
        let files: Vec<_> = list_source_files(source)?
            .into_iter()
            .filter(|p| registry.supports(p))
            .collect();
        let seen = self.db.documents.seen_files(source.id).await?;
        let seen_by_path: HashMap<&str, _> = seen
            .iter()
            .map(|s| (s.external_id.as_str(), s))
            .collect();

        let mut enqueued = 0;
        for path in &files {
            let path_str = path.to_string_lossy();
            let changed = match seen_by_path.get(path_str.as_ref()) {
                None => true,
                Some(record) => {
                    let metadata = std::fs::metadata(path)?;
                    let size = metadata.len() as i64;
                    let mtime = metadata
                        .modified()
                        .ok()
                        .and_then(|m| m.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
                        .map(|d| d.as_millis() as i64);
                    size != record.size_bytes || mtime != record.modified_ts
                }
            };
            if changed
                && self
                    .scheduler
                    .enqueue_watch_task(source.id, path, WatchTaskKind::Upsert)
                    .await?
                    .is_some()
            {
                enqueued += 1;
            }
        }

        let on_disk: std::collections::HashSet<String> = files
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();
        for record in &seen {
            if !on_disk.contains(&record.external_id)
                && self
                    .scheduler
                    .enqueue_watch_task(
                        source.id,
                        Path::new(&record.external_id),
                        WatchTaskKind::Delete,
                    )
                    .await?
                    .is_some()
            {
                enqueued += 1;
            }
        }

        info!(
            subsystem = "watcher",
            component = "reconcile",
            source_id = %source.id,
            file_count = files.len(),
            result_count = enqueued,
            "Reconciliation sweep complete"
        );
        Ok(enqueued)
    }

    /// Spawn the notify thread and the debounce loop for one source.
    fn spawn_watch_loop(&self, source: Source) {
        let (tx, mut rx) = mpsc::unbounded_channel::<(PathBuf, WatchTaskKind)>();
        let root = source_root(&source);
        let shutdown = self.shutdown.clone();
        let thread_shutdown = shutdown.clone();
        let thread_source = source.clone();

        std::thread::spawn(move || {
            if let Err(e) = watch_thread(&root, &thread_source, tx, thread_shutdown.clone()) {
                if !thread_shutdown.is_cancelled() {
                    error!(
                        subsystem = "watcher",
                        source_id = %thread_source.id,
                        error = %e,
                        "Watch thread failed"
                    );
                }
            }
        });

        let scheduler = self.scheduler.clone();
        let source_id = source.id;
        tokio::spawn(async move {
            let mut debounce =
                DebounceMap::new(Duration::from_millis(defaults::WATCH_DEBOUNCE_MS));
            loop {
                let timeout = debounce
                    .next_deadline()
                    .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                    .unwrap_or(Duration::from_secs(3600));

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = rx.recv() => {
                        let Some((path, kind)) = event else { break };
                        debounce.record(path, kind, Instant::now());
                    }
                    _ = tokio::time::sleep(timeout), if !debounce.is_empty() => {
                        for (path, kind) in debounce.drain_ready(Instant::now()) {
                            debug!(
                                subsystem = "watcher",
                                component = "debounce",
                                source_id = %source_id,
                                path = %path.display(),
                                "Emitting ingest task"
                            );
                            if let Err(e) = scheduler
                                .enqueue_watch_task(source_id, &path, kind)
                                .await
                            {
                                warn!(
                                    subsystem = "watcher",
                                    source_id = %source_id,
                                    error = %e,
                                    "Failed to enqueue watch task"
                                );
                            }
                        }
                    }
                }
            }
        });
    }
}

/// Blocking notify loop; forwards filtered events to the async side.
fn watch_thread(
    root: &Path,
    source: &Source,
    tx: mpsc::UnboundedSender<(PathBuf, WatchTaskKind)>,
    shutdown: CancellationToken,
) -> notify::Result<()> {
    let (watch_tx, watch_rx) = std::sync::mpsc::channel();
    let mut watcher = RecommendedWatcher::new(watch_tx, notify::Config::default())?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    let registry = LoaderRegistry::new();

    loop {
        if shutdown.is_cancelled() {
            break;
        }
        match watch_rx.recv_timeout(Duration::from_millis(250)) {
            Ok(Ok(event)) => {
                if let Some(kind) = task_kind(&event) {
                    for path in &event.paths {
                        if registry.supports(path)
                            && path_matches_source(source, path)
                            && tx.send((path.clone(), kind)).is_err()
                        {
                            return Ok(());
                        }
                    }
                }
            }
            Ok(Err(e)) => warn!(subsystem = "watcher", error = %e, "Watcher error"),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(())
}

fn task_kind(event: &Event) -> Option<WatchTaskKind> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => Some(WatchTaskKind::Upsert),
        EventKind::Remove(_) => Some(WatchTaskKind::Delete),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debounce_coalesces_bursts() {
        let mut debounce = DebounceMap::new(Duration::from_millis(500));
        let t0 = Instant::now();
        let path = PathBuf::from("/vault/a.md");

        debounce.record(path.clone(), WatchTaskKind::Upsert, t0);
        debounce.record(path.clone(), WatchTaskKind::Upsert, t0 + Duration::from_millis(100));
        debounce.record(path.clone(), WatchTaskKind::Upsert, t0 + Duration::from_millis(200));

        // Still inside the quiet window of the last event.
        assert!(debounce
            .drain_ready(t0 + Duration::from_millis(600))
            .is_empty());

        let ready = debounce.drain_ready(t0 + Duration::from_millis(800));
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0, path);
        assert!(debounce.is_empty());
    }

    #[test]
    fn test_debounce_latest_kind_wins() {
        let mut debounce = DebounceMap::new(Duration::from_millis(500));
        let t0 = Instant::now();
        let path = PathBuf::from("/vault/a.md");

        debounce.record(path.clone(), WatchTaskKind::Upsert, t0);
        debounce.record(path.clone(), WatchTaskKind::Delete, t0 + Duration::from_millis(50));

        let ready = debounce.drain_ready(t0 + Duration::from_secs(1));
        assert_eq!(ready[0].1, WatchTaskKind::Delete);
    }

    #[test]
    fn test_debounce_tracks_paths_independently() {
        let mut debounce = DebounceMap::new(Duration::from_millis(500));
        let t0 = Instant::now();

        debounce.record(PathBuf::from("/vault/a.md"), WatchTaskKind::Upsert, t0);
        debounce.record(
            PathBuf::from("/vault/b.md"),
            WatchTaskKind::Upsert,
            t0 + Duration::from_millis(400),
        );

        let ready = debounce.drain_ready(t0 + Duration::from_millis(600));
        assert_eq!(ready.len(), 1);
        assert!(ready[0].0.ends_with("a.md"));
        assert!(!debounce.is_empty());
    }

    #[test]
    fn test_next_deadline_is_earliest() {
        let mut debounce = DebounceMap::new(Duration::from_millis(500));
        let t0 = Instant::now();
        assert!(debounce.next_deadline().is_none());

        debounce.record(PathBuf::from("/a"), WatchTaskKind::Upsert, t0);
        debounce.record(
            PathBuf::from("/b"),
            WatchTaskKind::Upsert,
            t0 + Duration::from_millis(100),
        );
        assert_eq!(
            debounce.next_deadline(),
            Some(t0 + Duration::from_millis(500))
        );
    }
}
