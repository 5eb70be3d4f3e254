//! Ingest pipeline: load, hash-gate, chunk, embed, persist.
//!
//! Each file flows Load -> normalise -> sha-256 gate -> chunk -> embed ->
//! one transaction replacing document + chunks + embeddings (FTS follows
//! via triggers) -> vector index upsert. Files are processed in path order
//! for reproducibility; a per-file failure is recorded in the job stats and
//! the loop continues.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use ctxc_core::{
    defaults, new_v7, Chunk, EmbeddingRecord, EmbeddingStyle, Error, IngestError, IngestStats,
    LoadErrorKind, OpContext, Result, Source,
};
use ctxc_db::{Database, NewDocument};
use ctxc_embed::Embedder;
use ctxc_search::VectorIndex;

use crate::chunker::Chunker;
use crate::dedupe::{is_near_duplicate, sha256_hex, simhash};
use crate::loaders::{pdf_pages, LoadedDoc, LoaderRegistry};

/// Outcome of processing a single file.
#[derive(Debug, Default)]
struct FileOutcome {
    added: u64,
    skipped: u64,
    chunks: u64,
}

/// The ingestion engine shared by the scheduler and the HTTP layer.
pub struct IngestPipeline {
    db: Database,
    embedder: Arc<Embedder>,
    index: Arc<RwLock<VectorIndex>>,
    chunker: Chunker,
    registry: LoaderRegistry,
}

impl IngestPipeline {
    pub fn new(
        db: Database,
        embedder: Arc<Embedder>,
        index: Arc<RwLock<VectorIndex>>,
        chunker: Chunker,
    ) -> Self {
        Self {
            db,
            embedder,
            index,
            chunker,
            registry: LoaderRegistry::new(),
        }
    }

    pub fn registry(&self) -> &LoaderRegistry {
        &self.registry
    }

    /// Process files in deterministic path order, accumulating stats.
    /// Returns early only on cancellation or deadline expiry.
    pub async fn run_paths(
        &self,
        ctx: &OpContext,
        source_id: Uuid,
        paths: &[PathBuf],
        stats: &mut IngestStats,
    ) -> Result<()> {
        let mut ordered: Vec<&PathBuf> = paths.iter().collect();
        ordered.sort();

        for path in ordered {
            ctx.checkpoint()?;
            match self.ingest_file(ctx, source_id, path).await {
                Ok(outcome) => {
                    stats.documents_added += outcome.added;
                    stats.documents_skipped += outcome.skipped;
                    stats.chunks += outcome.chunks;
                }
                Err(e @ (Error::Cancelled(_) | Error::DeadlineExceeded)) => return Err(e),
                Err(Error::Load { kind, detail }) => {
                    warn!(
                        subsystem = "ingest",
                        component = "pipeline",
                        path = %path.display(),
                        error = %detail,
                        "File failed to load"
                    );
                    stats.errors.push(IngestError {
                        path: path.to_string_lossy().to_string(),
                        kind,
                        detail,
                    });
                }
                Err(other) => {
                    warn!(
                        subsystem = "ingest",
                        component = "pipeline",
                        path = %path.display(),
                        error = %other,
                        "File failed to persist"
                    );
                    stats.errors.push(IngestError {
                        path: path.to_string_lossy().to_string(),
                        kind: LoadErrorKind::Io,
                        detail: other.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Ingest every document contained in one file.
    async fn ingest_file(
        &self,
        ctx: &OpContext,
        source_id: Uuid,
        path: &Path,
    ) -> Result<FileOutcome> {
        let documents = self.load_with_retry(path).await?;
        let mut outcome = FileOutcome::default();

        for loaded in documents {
            ctx.checkpoint()?;
            let digest = sha256_hex(&loaded.bytes);
            let (document_id, was_new) = self
                .db
                .documents
                .upsert(&NewDocument {
                    source_id,
                    external_id: Some(loaded.external_id.clone()),
                    title: loaded.title.clone(),
                    author: loaded.author.clone(),
                    created_ts: loaded.created_ts,
                    modified_ts: loaded.modified_ts,
                    mime: loaded.mime.clone(),
                    sha256: digest,
                    text: loaded.text.clone(),
                    meta: loaded.meta.clone(),
                    size_bytes: loaded.bytes.len() as i64,
                })
                .await?;

            if !was_new {
                // Same bytes already indexed: metadata refreshed, chunks
                // and embeddings untouched.
                debug!(
                    subsystem = "ingest",
                    component = "pipeline",
                    document_id = %document_id,
                    path = %path.display(),
                    "Duplicate content, skipping re-embed"
                );
                outcome.skipped += 1;
                continue;
            }

            outcome.chunks += self.chunk_and_persist(ctx, document_id, &loaded).await?;
            outcome.added += 1;
        }

        Ok(outcome)
    }

    /// Chunk, embed, and atomically persist one new document.
    async fn chunk_and_persist(
        &self,
        ctx: &OpContext,
        document_id: Uuid,
        loaded: &LoadedDoc,
    ) -> Result<u64> {
        let pages = pdf_pages(&loaded.meta);
        let pieces = self.chunker.chunk(&loaded.text, &pages);

        // Every piece is stored, so the chunk spans always cover the whole
        // document. A piece whose fingerprint near-matches an earlier chunk
        // keeps its own span and ordinal but reuses that chunk's vector
        // instead of being embedded again.
        let mut chunks: Vec<Chunk> = Vec::with_capacity(pieces.len());
        let mut fingerprints: Vec<u64> = Vec::with_capacity(pieces.len());
        let mut canonical: Vec<usize> = Vec::with_capacity(pieces.len());
        for (i, piece) in pieces.into_iter().enumerate() {
            let fingerprint = simhash(&piece.text);
            let duplicate_of = fingerprints
                .iter()
                .position(|&f| is_near_duplicate(f, fingerprint));
            fingerprints.push(fingerprint);
            canonical.push(duplicate_of.map(|d| canonical[d]).unwrap_or(i));

            let mut meta = serde_json::Map::new();
            meta.insert(
                "tokenizer".to_string(),
                serde_json::Value::String(self.chunker.tokenizer_name().to_string()),
            );
            if let Some(section) = &piece.section {
                meta.insert(
                    "section".to_string(),
                    serde_json::Value::String(section.clone()),
                );
            }
            if let Some(page) = piece.page_from {
                meta.insert("page_from".to_string(), serde_json::Value::from(page));
            }
            if let Some(page) = piece.page_to {
                meta.insert("page_to".to_string(), serde_json::Value::from(page));
            }

            chunks.push(Chunk {
                id: new_v7(),
                document_id,
                ordinal: i as i64,
                start_char: piece.start_char as i64,
                end_char: piece.end_char as i64,
                text: piece.text,
                token_count: piece.token_count as i64,
                meta: serde_json::Value::Object(meta),
            });
        }

        // Embed each distinct chunk once; duplicates share the vector.
        let distinct: Vec<usize> = canonical
            .iter()
            .enumerate()
            .filter(|(i, &root)| root == *i)
            .map(|(i, _)| i)
            .collect();
        let texts: Vec<String> = distinct.iter().map(|&i| chunks[i].text.clone()).collect();
        let batch = self.embed_with_retry(&texts).await?;
        let batch_slot: HashMap<usize, usize> = distinct
            .iter()
            .enumerate()
            .map(|(slot, &i)| (i, slot))
            .collect();
        let embeddings: Vec<EmbeddingRecord> = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| EmbeddingRecord {
                chunk_id: chunk.id,
                model: batch.model.clone(),
                dim: batch.dim as i64,
                vector: batch.vectors[batch_slot[&canonical[i]]].clone(),
                style: EmbeddingStyle::Dense,
            })
            .collect();

        // Cancellation checked before the commit: the document lands
        // either whole or not at all.
        ctx.checkpoint()?;
        self.db
            .chunks
            .replace_for_document(document_id, &chunks, &embeddings)
            .await?;

        {
            let ids: Vec<Uuid> = embeddings.iter().map(|e| e.chunk_id).collect();
            let vectors: Vec<Vec<f32>> = embeddings.iter().map(|e| e.vector.clone()).collect();
            let mut index = self.index.write().await;
            index.upsert(&ids, &vectors)?;
        }

        info!(
            subsystem = "ingest",
            component = "pipeline",
            document_id = %document_id,
            chunk_count = chunks.len(),
            model = %batch.model,
            "Document indexed"
        );
        Ok(chunks.len() as u64)
    }

    /// Loader call with exponential backoff on transient I/O failures.
    async fn load_with_retry(&self, path: &Path) -> Result<Vec<LoadedDoc>> {
        let mut attempt = 0;
        loop {
            match self.registry.load(path) {
                Err(Error::Load {
                    kind: LoadErrorKind::Io,
                    detail,
                }) if attempt < defaults::IO_RETRY_ATTEMPTS => {
                    let backoff = defaults::IO_RETRY_BASE_MS << attempt;
                    debug!(
                        subsystem = "ingest",
                        component = "pipeline",
                        path = %path.display(),
                        attempt,
                        backoff_ms = backoff,
                        error = %detail,
                        "Transient I/O failure, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Embedding call with the per-batch retry budget.
    async fn embed_with_retry(&self, texts: &[String]) -> Result<ctxc_embed::EmbeddingBatch> {
        let mut attempt = 0;
        loop {
            match self.embedder.encode_passages(texts).await {
                Err(Error::Embed(detail)) if attempt < defaults::EMBED_RETRY_ATTEMPTS => {
                    debug!(
                        subsystem = "ingest",
                        component = "pipeline",
                        attempt,
                        error = %detail,
                        "Embedding batch failed, retrying"
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Resolve a source URI to its filesystem root.
pub fn source_root(source: &Source) -> PathBuf {
    let uri = source.uri.strip_prefix("file://").unwrap_or(&source.uri);
    PathBuf::from(uri)
}

/// Enumerate the files of a folder source, applying its include/exclude
/// globs against paths relative to the root. Results are sorted.
pub fn list_source_files(source: &Source) -> Result<Vec<PathBuf>> {
    let root = source_root(source);
    if root.is_file() {
        return Ok(vec![root]);
    }
    if !root.is_dir() {
        return Err(Error::NotFound(format!(
            "source root {} does not exist",
            root.display()
        )));
    }

    let include = build_globset(source.include_glob.as_deref().unwrap_or("**/*"))?;
    let exclude = build_globset(
        source
            .exclude_glob
            .as_deref()
            .unwrap_or(defaults::WATCH_EXCLUDE),
    )?;

    let mut files = Vec::new();
    for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(&root).unwrap_or(path);
        let rel_str = relative.to_string_lossy();
        if exclude.is_match(rel_str.as_ref()) {
            continue;
        }
        if !include.is_match(rel_str.as_ref()) {
            continue;
        }
        files.push(path.to_path_buf());
    }
    files.sort();
    Ok(files)
}

/// Whether one path passes a source's glob filters.
pub fn path_matches_source(source: &Source, path: &Path) -> bool {
    let root = source_root(source);
    let relative = path.strip_prefix(&root).unwrap_or(path);
    let rel_str = relative.to_string_lossy();

    let include = source.include_glob.as_deref().unwrap_or("**/*");
    let exclude = source
        .exclude_glob
        .as_deref()
        .unwrap_or(defaults::WATCH_EXCLUDE);
    let included = build_globset(include)
        .map(|g| g.is_match(rel_str.as_ref()))
        .unwrap_or(false);
    let excluded = build_globset(exclude)
        .map(|g| g.is_match(rel_str.as_ref()))
        .unwrap_or(false);
    included && !excluded
}

fn build_globset(pattern: &str) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    builder.add(
        Glob::new(pattern).map_err(|e| Error::Config(format!("bad glob {pattern:?}: {e}")))?,
    );
    builder
        .build()
        .map_err(|e| Error::Config(format!("bad glob {pattern:?}: {e}")))
}

/// Chunk ids currently stored for a set of documents, used to prune the
/// vector index after deletions.
pub async fn chunk_ids_for_documents(db: &Database, document_ids: &[Uuid]) -> Result<Vec<Uuid>> {
    let mut ids = Vec::new();
    let mut seen = HashSet::new();
    for &document_id in document_ids {
        for chunk in db.chunks.for_document(document_id).await? {
            if seen.insert(chunk.id) {
                ids.push(chunk.id);
            }
        }
    }
    Ok(ids)
}
