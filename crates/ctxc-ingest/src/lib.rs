//! # ctxc-ingest
//!
//! The ingestion side of Context Cache:
//! - loaders extracting normalised documents from files
//! - the structure-aware chunker
//! - content-addressed deduplication (sha-256 + SimHash)
//! - the pipeline composing load -> chunk -> embed -> persist
//! - the filesystem watcher with debounce and reconciliation
//! - the bounded-worker job scheduler

pub mod chunker;
pub mod dedupe;
pub mod loaders;
pub mod pipeline;
pub mod scheduler;
pub mod watcher;

pub use chunker::{Chunker, ChunkerConfig, ChunkPiece};
pub use dedupe::{is_near_duplicate, sha256_hex, simhash};
pub use loaders::{LoadedDoc, LoaderRegistry, PageSpan};
pub use pipeline::{list_source_files, path_matches_source, source_root, IngestPipeline};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerEvent, SchedulerHandle, WatchTaskKind};
pub use watcher::{DebounceMap, SourceWatcher};
