//! Shared fixtures for unit and integration tests.
//!
//! Always compiled so integration tests in `tests/` can use them too.

use uuid::Uuid;

use ctxc_core::{new_v7, Chunk, CreateSourceRequest, Source, SourceKind};

use crate::documents::NewDocument;
use crate::pool::create_in_memory;
use crate::schema::ensure_schema;
use crate::Database;

/// Fresh in-memory database with the schema applied.
pub async fn memory_db() -> Database {
    let pool = create_in_memory().await.expect("in-memory pool");
    ensure_schema(&pool).await.expect("schema");
    Database::new(pool)
}

/// Register a folder source for fixtures.
pub async fn sample_source(db: &Database) -> Source {
    db.sources
        .upsert(&CreateSourceRequest {
            label: Some("fixtures".into()),
            kind: SourceKind::Folder,
            uri: format!("file:///fixtures/{}", new_v7()),
            include_glob: None,
            exclude_glob: None,
        })
        .await
        .expect("source")
}

/// Insert a minimal markdown document and return its id.
pub async fn sample_document(db: &Database, source_id: Uuid, sha: &str, text: &str) -> Uuid {
    let (id, _) = db
        .documents
        .upsert(&NewDocument {
            source_id,
            external_id: Some(format!("/fixtures/{sha}.md")),
            title: Some("fixture".into()),
            author: None,
            created_ts: None,
            modified_ts: Some(1_000),
            mime: "text/markdown".into(),
            sha256: sha.into(),
            text: text.into(),
            meta: serde_json::json!({}),
            size_bytes: text.len() as i64,
        })
        .await
        .expect("document");
    id
}

/// One single-chunk document per text; returns the chunk ids in order.
pub async fn ingest_text_chunks(db: &Database, source_id: Uuid, texts: &[&str]) -> Vec<Uuid> {
    let mut chunk_ids = Vec::with_capacity(texts.len());
    for (i, text) in texts.iter().enumerate() {
        let doc_id = sample_document(db, source_id, &format!("sha-{i}-{}", new_v7()), text).await;
        let chunk = Chunk {
            id: new_v7(),
            document_id: doc_id,
            ordinal: 0,
            start_char: 0,
            end_char: text.len() as i64,
            text: text.to_string(),
            token_count: (text.len() as i64 / 4).max(1),
            meta: serde_json::json!({}),
        };
        db.chunks
            .replace_for_document(doc_id, &[chunk.clone()], &[])
            .await
            .expect("chunks");
        chunk_ids.push(chunk.id);
    }
    chunk_ids
}
