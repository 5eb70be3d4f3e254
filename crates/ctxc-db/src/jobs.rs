//! Ingest job repository.
//!
//! Jobs live in the `ingest_jobs` table and move through the monotonic
//! lifecycle queued -> running -> {done, error}. Claim order is priority
//! first, then FIFO within a priority band.

use serde_json::Value as JsonValue;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use ctxc_core::{
    new_v7, Error, IngestJob, IngestStats, JobPriority, JobStatus, Result,
};

use crate::documents::parse_uuid;
use crate::time::{ms_to_datetime, now_ms};

/// Repository for ingest jobs.
pub struct JobRepository {
    pool: SqlitePool,
}

impl JobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Queue a new job. The payload carries the paths or source ids to
    /// process.
    pub async fn queue(
        &self,
        source_id: Option<Uuid>,
        priority: JobPriority,
        payload: JsonValue,
    ) -> Result<Uuid> {
        let id = new_v7();
        sqlx::query(
            "INSERT INTO ingest_jobs (id, source_id, status, priority, payload_json, created_at)
             VALUES (?, ?, 'queued', ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(source_id.map(|s| s.to_string()))
        .bind(priority.as_i64())
        .bind(payload.to_string())
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(id)
    }

    /// Queue a job unless an identical payload is already waiting.
    ///
    /// Atomic check-and-insert so concurrent watcher events for the same
    /// path coalesce into one queued job. Returns `None` when coalesced.
    pub async fn queue_deduplicated(
        &self,
        source_id: Option<Uuid>,
        priority: JobPriority,
        payload: JsonValue,
    ) -> Result<Option<Uuid>> {
        let id = new_v7();
        let payload_str = payload.to_string();
        let row = sqlx::query(
            "INSERT INTO ingest_jobs (id, source_id, status, priority, payload_json, created_at)
             SELECT ?, ?, 'queued', ?, ?, ?
             WHERE NOT EXISTS (
                 SELECT 1 FROM ingest_jobs
                 WHERE status = 'queued' AND payload_json = ?
             )
             RETURNING id",
        )
        .bind(id.to_string())
        .bind(source_id.map(|s| s.to_string()))
        .bind(priority.as_i64())
        .bind(&payload_str)
        .bind(now_ms())
        .bind(&payload_str)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|_| id))
    }

    /// Claim the next queued job: highest priority first, FIFO within a
    /// priority band. Returns `None` when the queue is empty.
    pub async fn claim_next(&self) -> Result<Option<IngestJob>> {
        let row = sqlx::query(
            "UPDATE ingest_jobs
             SET status = 'running', started_at = ?
             WHERE id = (
                 SELECT id FROM ingest_jobs
                 WHERE status = 'queued'
                 ORDER BY priority DESC, created_at ASC, rowid ASC
                 LIMIT 1
             )
             RETURNING *",
        )
        .bind(now_ms())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(parse_job_row).transpose()
    }

    /// Record a successful finish with the accumulated stats.
    pub async fn complete(&self, job_id: Uuid, stats: &IngestStats) -> Result<()> {
        sqlx::query(
            "UPDATE ingest_jobs SET status = 'done', finished_at = ?, stats_json = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(now_ms())
        .bind(serde_json::to_string(stats)?)
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Record a failed finish, keeping whatever stats accumulated.
    pub async fn fail(&self, job_id: Uuid, reason: &str, stats: &IngestStats) -> Result<()> {
        sqlx::query(
            "UPDATE ingest_jobs SET status = 'error', error = ?, finished_at = ?, stats_json = ?
             WHERE id = ? AND status IN ('queued', 'running')",
        )
        .bind(reason)
        .bind(now_ms())
        .bind(serde_json::to_string(stats)?)
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Cancel a queued or running job. The scheduler also trips the job's
    /// cancellation token; this records the terminal state.
    pub async fn cancel(&self, job_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE ingest_jobs SET status = 'error', error = 'cancelled', finished_at = ?
             WHERE id = ? AND status IN ('queued', 'running')",
        )
        .bind(now_ms())
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected() > 0)
    }

    /// Fetch one job by id.
    pub async fn get(&self, job_id: Uuid) -> Result<IngestJob> {
        let row = sqlx::query("SELECT * FROM ingest_jobs WHERE id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;
        parse_job_row(&row)
    }

    /// Number of jobs currently waiting.
    pub async fn queued_count(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM ingest_jobs WHERE status = 'queued'")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(count)
    }
}

fn parse_job_row(row: &sqlx::sqlite::SqliteRow) -> Result<IngestJob> {
    let status: String = row.get("status");
    let priority: i64 = row.get("priority");
    let payload: String = row.get("payload_json");
    let stats: String = row.get("stats_json");
    let source_id: Option<String> = row.get("source_id");

    Ok(IngestJob {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        source_id: source_id.as_deref().map(parse_uuid).transpose()?,
        status: status
            .parse::<JobStatus>()
            .map_err(Error::Internal)?,
        priority: match priority {
            2 => JobPriority::High,
            0 => JobPriority::Low,
            _ => JobPriority::Normal,
        },
        payload: serde_json::from_str(&payload).unwrap_or(JsonValue::Null),
        started_at: row.get::<Option<i64>, _>("started_at").map(ms_to_datetime),
        finished_at: row.get::<Option<i64>, _>("finished_at").map(ms_to_datetime),
        stats: serde_json::from_str(&stats).unwrap_or_default(),
        created_at: ms_to_datetime(row.get("created_at")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_db;

    #[tokio::test]
    async fn test_queue_and_claim_fifo_within_priority() {
        let db = memory_db().await;
        let first = db
            .jobs
            .queue(None, JobPriority::Normal, serde_json::json!({"n": 1}))
            .await
            .unwrap();
        let second = db
            .jobs
            .queue(None, JobPriority::Normal, serde_json::json!({"n": 2}))
            .await
            .unwrap();

        let a = db.jobs.claim_next().await.unwrap().unwrap();
        let b = db.jobs.claim_next().await.unwrap().unwrap();
        assert_eq!(a.id, first);
        assert_eq!(b.id, second);
        assert_eq!(a.status, JobStatus::Running);
        assert!(db.jobs.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_high_priority_claims_first() {
        let db = memory_db().await;
        db.jobs
            .queue(None, JobPriority::Low, serde_json::json!({"n": "low"}))
            .await
            .unwrap();
        let high = db
            .jobs
            .queue(None, JobPriority::High, serde_json::json!({"n": "high"}))
            .await
            .unwrap();

        let claimed = db.jobs.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, high);
    }

    #[tokio::test]
    async fn test_queue_deduplicated_coalesces() {
        let db = memory_db().await;
        let payload = serde_json::json!({"path": "/tmp/a.md", "kind": "upsert"});
        let first = db
            .jobs
            .queue_deduplicated(None, JobPriority::Normal, payload.clone())
            .await
            .unwrap();
        assert!(first.is_some());
        let second = db
            .jobs
            .queue_deduplicated(None, JobPriority::Normal, payload.clone())
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(db.jobs.queued_count().await.unwrap(), 1);

        // Once claimed, the same payload may queue again.
        db.jobs.claim_next().await.unwrap().unwrap();
        let third = db
            .jobs
            .queue_deduplicated(None, JobPriority::Normal, payload)
            .await
            .unwrap();
        assert!(third.is_some());
    }

    #[tokio::test]
    async fn test_complete_records_stats() {
        let db = memory_db().await;
        let id = db
            .jobs
            .queue(None, JobPriority::Normal, serde_json::json!({}))
            .await
            .unwrap();
        db.jobs.claim_next().await.unwrap().unwrap();

        let stats = IngestStats {
            documents_added: 3,
            documents_skipped: 1,
            chunks: 9,
            duration_ms: 42,
            errors: vec![],
        };
        db.jobs.complete(id, &stats).await.unwrap();

        let job = db.jobs.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.stats.documents_added, 3);
        assert_eq!(job.stats.chunks, 9);
        assert!(job.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_cancel_marks_error_with_reason() {
        let db = memory_db().await;
        let id = db
            .jobs
            .queue(None, JobPriority::Normal, serde_json::json!({}))
            .await
            .unwrap();
        assert!(db.jobs.cancel(id).await.unwrap());

        let job = db.jobs.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Error);
        // Terminal states cannot be cancelled again.
        assert!(!db.jobs.cancel(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_missing_job_is_not_found() {
        let db = memory_db().await;
        assert!(matches!(
            db.jobs.get(Uuid::nil()).await,
            Err(Error::NotFound(_))
        ));
    }
}
