//! Schema bootstrap.
//!
//! The full DDL lives here and is applied idempotently at startup. The FTS5
//! index over chunk text is an external-content table kept consistent with
//! `chunks` by insert/update/delete triggers, so repositories never touch it
//! directly.

use sqlx::SqlitePool;

use ctxc_core::{Error, Result};

/// Complete schema, applied statement by statement.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sources (
    id            TEXT PRIMARY KEY,
    kind          TEXT NOT NULL,
    uri           TEXT NOT NULL UNIQUE,
    label         TEXT,
    include_glob  TEXT,
    exclude_glob  TEXT,
    created_at    INTEGER NOT NULL,
    updated_at    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS documents (
    id            TEXT PRIMARY KEY,
    source_id     TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
    external_id   TEXT,
    title         TEXT,
    author        TEXT,
    created_ts    INTEGER,
    modified_ts   INTEGER,
    mime          TEXT NOT NULL,
    sha256        TEXT NOT NULL UNIQUE,
    text          TEXT NOT NULL,
    meta_json     TEXT NOT NULL DEFAULT '{}',
    size_bytes    INTEGER NOT NULL DEFAULT 0,
    is_deleted    INTEGER NOT NULL DEFAULT 0,
    deleted_at    INTEGER,
    created_at    INTEGER NOT NULL,
    updated_at    INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source_id);
CREATE INDEX IF NOT EXISTS idx_documents_external ON documents(external_id);

CREATE TABLE IF NOT EXISTS chunks (
    id            TEXT PRIMARY KEY,
    document_id   TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    ordinal       INTEGER NOT NULL,
    start_char    INTEGER NOT NULL,
    end_char      INTEGER NOT NULL,
    text          TEXT NOT NULL,
    token_count   INTEGER NOT NULL,
    meta_json     TEXT NOT NULL DEFAULT '{}',
    created_at    INTEGER NOT NULL,
    UNIQUE (document_id, ordinal)
);

CREATE TABLE IF NOT EXISTS embeddings (
    chunk_id      TEXT NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
    model         TEXT NOT NULL,
    dim           INTEGER NOT NULL,
    vector        BLOB NOT NULL,
    style         TEXT NOT NULL DEFAULT 'dense',
    created_at    INTEGER NOT NULL,
    PRIMARY KEY (chunk_id, model)
);

CREATE TABLE IF NOT EXISTS ingest_jobs (
    id            TEXT PRIMARY KEY,
    source_id     TEXT REFERENCES sources(id) ON DELETE SET NULL,
    status        TEXT NOT NULL DEFAULT 'queued',
    priority      INTEGER NOT NULL DEFAULT 1,
    payload_json  TEXT NOT NULL DEFAULT '{}',
    stats_json    TEXT NOT NULL DEFAULT '{}',
    error         TEXT,
    created_at    INTEGER NOT NULL,
    started_at    INTEGER,
    finished_at   INTEGER
);

CREATE INDEX IF NOT EXISTS idx_jobs_claim
    ON ingest_jobs(status, priority DESC, created_at ASC);

CREATE TABLE IF NOT EXISTS tags (
    id     TEXT PRIMARY KEY,
    label  TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS document_tags (
    document_id  TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    tag_id       TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    PRIMARY KEY (document_id, tag_id)
);

CREATE TABLE IF NOT EXISTS chunk_tags (
    chunk_id  TEXT NOT NULL REFERENCES chunks(id) ON DELETE CASCADE,
    tag_id    TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    PRIMARY KEY (chunk_id, tag_id)
);

CREATE TABLE IF NOT EXISTS queries (
    id              TEXT PRIMARY KEY,
    query           TEXT NOT NULL,
    filters_json    TEXT NOT NULL DEFAULT '{}',
    rerank_enabled  INTEGER NOT NULL DEFAULT 0,
    created_at      INTEGER NOT NULL
);

-- chunk_id deliberately carries no foreign key: the journal snapshot must
-- replay verbatim after its chunks and documents are gone.
CREATE TABLE IF NOT EXISTS query_results (
    query_id         TEXT NOT NULL REFERENCES queries(id) ON DELETE CASCADE,
    chunk_id         TEXT NOT NULL,
    rank             INTEGER NOT NULL,
    score            REAL NOT NULL,
    provenance_json  TEXT NOT NULL,
    PRIMARY KEY (query_id, rank)
);

CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    text,
    content='chunks',
    content_rowid='rowid',
    tokenize='unicode61 remove_diacritics 0'
);

CREATE TRIGGER IF NOT EXISTS chunks_fts_ai AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, text) VALUES (new.rowid, new.text);
END;

CREATE TRIGGER IF NOT EXISTS chunks_fts_ad AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, text)
    VALUES ('delete', old.rowid, old.text);
END;

CREATE TRIGGER IF NOT EXISTS chunks_fts_au AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, text)
    VALUES ('delete', old.rowid, old.text);
    INSERT INTO chunks_fts(rowid, text) VALUES (new.rowid, new.text);
END;
"#;

/// Apply the schema. Safe to call on every startup.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    for statement in split_statements(SCHEMA) {
        sqlx::query(&statement)
            .execute(pool)
            .await
            .map_err(Error::Database)?;
    }
    Ok(())
}

/// Split the DDL on statement boundaries, keeping trigger bodies intact.
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_trigger = false;

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") || (trimmed.is_empty() && current.trim().is_empty()) {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        let upper = trimmed.to_ascii_uppercase();
        if upper.starts_with("CREATE TRIGGER") {
            in_trigger = true;
        }
        let terminated = if in_trigger {
            upper.starts_with("END;")
        } else {
            trimmed.ends_with(';')
        };
        if terminated {
            statements.push(current.trim().to_string());
            current.clear();
            in_trigger = false;
        }
    }
    if !current.trim().is_empty() {
        statements.push(current.trim().to_string());
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::create_in_memory;

    #[test]
    fn test_split_statements_keeps_triggers_whole() {
        let statements = split_statements(SCHEMA);
        let triggers: Vec<_> = statements
            .iter()
            .filter(|s| s.starts_with("CREATE TRIGGER"))
            .collect();
        assert_eq!(triggers.len(), 3);
        for t in triggers {
            assert!(t.ends_with("END;"), "trigger lost its body: {t}");
        }
    }

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let pool = create_in_memory().await.unwrap();
        ensure_schema(&pool).await.unwrap();
        ensure_schema(&pool).await.unwrap();

        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'documents'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_fts_triggers_track_chunk_rows() {
        let pool = create_in_memory().await.unwrap();
        ensure_schema(&pool).await.unwrap();

        sqlx::query(
            "INSERT INTO sources (id, kind, uri, created_at, updated_at)
             VALUES ('s1', 'folder', 'file:///tmp', 0, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO documents (id, source_id, mime, sha256, text, created_at, updated_at)
             VALUES ('d1', 's1', 'text/plain', 'hash', 'espresso machines', 0, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO chunks (id, document_id, ordinal, start_char, end_char, text, token_count, created_at)
             VALUES ('c1', 'd1', 0, 0, 17, 'espresso machines', 3, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let (hits,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM chunks_fts WHERE chunks_fts MATCH 'espresso'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(hits, 1);

        // Cascaded delete through documents must clean the FTS row too.
        sqlx::query("DELETE FROM documents WHERE id = 'd1'")
            .execute(&pool)
            .await
            .unwrap();
        let (hits,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM chunks_fts WHERE chunks_fts MATCH 'espresso'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(hits, 0);
    }
}
