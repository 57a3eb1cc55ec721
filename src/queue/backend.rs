//! Durable job queue, Postgres-table-backed (spec §4.6).
//!
//! No crate in the example pack reaches for a message broker client;
//! the backing store reuses the `sqlx` pool the mirror store already
//! requires (see DESIGN.md).

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::MailmeshResult;

use super::job::{backoff_duration, Job, JobPayload, JobState, QueueName, MAX_ATTEMPTS};

#[derive(Clone)]
pub struct QueueBackend {
    pool: PgPool,
}

impl QueueBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self, payload))]
    pub async fn enqueue(&self, payload: JobPayload) -> MailmeshResult<Uuid> {
        let id = Uuid::new_v4();
        let queue = payload.queue().as_str();
        let payload_json = serde_json::to_value(&payload)?;
        sqlx::query(
            r#"
            INSERT INTO sync_job (id, queue, payload, state, attempt_count, backoff_until, created_at)
            VALUES ($1, $2, $3, 'queued', 0, NULL, $4)
            "#,
        )
        .bind(id)
        .bind(queue)
        .bind(payload_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Claims one ready job from `queue`, skipping rows locked by
    /// another worker (`SELECT ... FOR UPDATE SKIP LOCKED`) so
    /// concurrent workers never double-claim. Returns `None` if nothing
    /// is ready.
    #[tracing::instrument(skip(self))]
    pub async fn claim_next(&self, queue: QueueName) -> MailmeshResult<Option<Job>> {
        let mut tx = self.pool.begin().await?;
        let row: Option<(Uuid, serde_json::Value, i32, chrono::DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT id, payload, attempt_count, created_at
            FROM sync_job
            WHERE queue = $1
              AND state = 'queued'
              AND (backoff_until IS NULL OR backoff_until <= now())
            ORDER BY created_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .bind(queue.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((id, payload_json, attempt_count, created_at)) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        sqlx::query("UPDATE sync_job SET state = 'running' WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let payload: JobPayload = serde_json::from_value(payload_json)?;
        Ok(Some(Job {
            id,
            payload,
            state: JobState::Running,
            attempt_count,
            backoff_until: None,
            created_at,
        }))
    }

    pub async fn complete(&self, job_id: Uuid) -> MailmeshResult<()> {
        sqlx::query("UPDATE sync_job SET state = 'completed' WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Records a failed attempt. Dead-letters the job once
    /// [`MAX_ATTEMPTS`] is reached (spec §4.6/§7); otherwise reschedules
    /// with exponential backoff.
    pub async fn fail(&self, job_id: Uuid, attempt_count: i32) -> MailmeshResult<()> {
        let next_attempt = attempt_count + 1;
        if next_attempt >= MAX_ATTEMPTS {
            sqlx::query("UPDATE sync_job SET state = 'dead', attempt_count = $2 WHERE id = $1")
                .bind(job_id)
                .bind(next_attempt)
                .execute(&self.pool)
                .await?;
        } else {
            let backoff_until = Utc::now() + backoff_duration(next_attempt);
            sqlx::query(
                "UPDATE sync_job SET state = 'queued', attempt_count = $2, backoff_until = $3 WHERE id = $1",
            )
            .bind(job_id)
            .bind(next_attempt)
            .bind(backoff_until)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Fails a job immediately with no retry (spec §7:
    /// `CredentialRejected` — "the sync job fails immediately without
    /// retry").
    pub async fn fail_permanently(&self, job_id: Uuid) -> MailmeshResult<()> {
        sqlx::query("UPDATE sync_job SET state = 'dead' WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Retention sweep: completed jobs kept 1h or last 100, failed/dead
    /// jobs kept 24h (spec §4.6).
    pub async fn sweep_retention(&self) -> MailmeshResult<()> {
        sqlx::query(
            r#"
            DELETE FROM sync_job
            WHERE state = 'completed'
              AND created_at < now() - interval '1 hour'
              AND id NOT IN (
                  SELECT id FROM sync_job WHERE state = 'completed'
                  ORDER BY created_at DESC LIMIT 100
              )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "DELETE FROM sync_job WHERE state = 'dead' AND created_at < now() - interval '24 hours'",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
