//! # ctxc-db
//!
//! SQLite storage layer for Context Cache.
//!
//! This crate provides:
//! - Connection pool management with WAL journaling and enforced foreign keys
//! - Repositories for sources, documents, chunks, embeddings, tags, and jobs
//! - Full-text search over chunk text with SQLite FTS5 (BM25)
//! - The immutable query journal behind `/why`
//!
//! The embeddings blob column is the canonical copy of all vectors; the
//! in-memory vector index in `ctxc-search` is a rebuildable cache over it.

pub mod chunks;
pub mod documents;
pub mod embeddings;
pub mod fts;
pub mod jobs;
pub mod journal;
pub mod pool;
pub mod schema;
pub mod sources;
pub mod tags;
mod time;

// Test fixtures, always compiled so integration tests can use them.
pub mod test_support;

// Re-export core types
pub use ctxc_core::*;

pub use chunks::{ChunkRepository, HydratedChunk};
pub use documents::{DocumentRepository, NewDocument, SeenFile};
pub use embeddings::{blob_to_vector, vector_to_blob, EmbeddingRepository};
pub use fts::FtsSearch;
pub use jobs::JobRepository;
pub use journal::QueryJournal;
pub use pool::{create_in_memory, create_pool, create_pool_with_config, PoolConfig};
pub use schema::ensure_schema;
pub use sources::SourceRepository;
pub use tags::TagRepository;

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::SqlitePool,
    /// Source registry.
    pub sources: SourceRepository,
    /// Document repository with the content-hash gate.
    pub documents: DocumentRepository,
    /// Chunk repository (atomic per-document rewrites).
    pub chunks: ChunkRepository,
    /// Embedding repository (canonical vector storage).
    pub embeddings: EmbeddingRepository,
    /// Tag repository.
    pub tags: TagRepository,
    /// Ingest job queue.
    pub jobs: JobRepository,
    /// Full-text search provider.
    pub fts: FtsSearch,
    /// Immutable query journal.
    pub journal: QueryJournal,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self {
            sources: SourceRepository::new(pool.clone()),
            documents: DocumentRepository::new(pool.clone()),
            chunks: ChunkRepository::new(pool.clone()),
            embeddings: EmbeddingRepository::new(pool.clone()),
            tags: TagRepository::new(pool.clone()),
            jobs: JobRepository::new(pool.clone()),
            fts: FtsSearch::new(pool.clone()),
            journal: QueryJournal::new(pool.clone()),
            pool,
        }
    }

    /// Open (creating if needed) the database file and apply the schema.
    pub async fn connect(db_path: &std::path::Path) -> Result<Self> {
        let pool = create_pool(db_path).await?;
        ensure_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    /// In-memory database for tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = create_in_memory().await?;
        ensure_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::SqlitePool {
        &self.pool
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self::new(self.pool.clone())
    }
}
