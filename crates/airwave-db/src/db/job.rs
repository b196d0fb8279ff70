use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::time::Duration;
use uuid::Uuid;

use airwave_core::models::{FailOutcome, Job, JobKind, JobPayload, JobState, JobStats};

use super::transaction::{is_unique_violation, ImmediateTransaction};

const ENQUEUE_MAX_ATTEMPTS: usize = 3;

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The job was queued and is now cancelled.
    Cancelled,
    /// The job is leased; its handler will stop at the next stage boundary.
    Requested,
    AlreadyFinished { state: JobState },
    NotFound,
}

/// What one pass over expired leases did.
#[derive(Debug, Default)]
pub struct ReapReport {
    pub requeued: u64,
    pub cancelled: u64,
    /// Jobs whose final attempt expired; their media items still need updating.
    pub exhausted: Vec<Job>,
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

#[derive(Clone)]
pub struct JobRepository {
    pool: SqlitePool,
}

impl JobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Enqueue a job for its media item.
    ///
    /// Idempotent per (media item, kind): while a queued or leased job exists
    /// for the pair, that job is returned instead of creating a new one.
    #[tracing::instrument(skip(self), fields(db.table = "jobs", db.operation = "insert"))]
    pub async fn enqueue(&self, payload: &JobPayload, max_attempts: i32) -> Result<Job> {
        let kind = payload.kind();
        let media_id = payload.media_id();
        let body = serde_json::to_string(payload).context("Failed to serialize job payload")?;

        for _ in 0..ENQUEUE_MAX_ATTEMPTS {
            let now = Utc::now();
            let inserted = sqlx::query_as::<_, Job>(
                r#"
                INSERT INTO jobs (
                    id, kind, media_id, payload, state, attempts, max_attempts,
                    available_at, created_at, updated_at
                )
                VALUES (?, ?, ?, ?, 'queued', 0, ?, ?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(kind.as_str())
            .bind(media_id)
            .bind(&body)
            .bind(max_attempts)
            .bind(now)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await;

            match inserted {
                Ok(job) => {
                    tracing::info!(
                        job_id = %job.id,
                        media_id = %media_id,
                        kind = %kind,
                        "Job enqueued"
                    );
                    return Ok(job);
                }
                Err(err) if is_unique_violation(&err) => {
                    if let Some(active) = self.active_for_media(media_id, kind).await? {
                        tracing::debug!(
                            job_id = %active.id,
                            media_id = %media_id,
                            kind = %kind,
                            "Active job already exists, not enqueuing another"
                        );
                        return Ok(active);
                    }
                    // The active job finished between the insert and the lookup.
                }
                Err(err) => return Err(err).context("Failed to insert job"),
            }
        }

        anyhow::bail!(
            "Failed to enqueue {} job for media {}: active job kept changing",
            kind,
            media_id
        )
    }

    #[tracing::instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch job")?;
        Ok(job)
    }

    pub async fn active_for_media(&self, media_id: Uuid, kind: JobKind) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE media_id = ? AND kind = ? AND state IN ('queued', 'leased')",
        )
        .bind(media_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch active job")?;
        Ok(job)
    }

    /// All jobs for a media item, newest first.
    pub async fn list_for_media(&self, media_id: Uuid) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE media_id = ? ORDER BY created_at DESC",
        )
        .bind(media_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list jobs for media")?;
        Ok(jobs)
    }

    /// Atomically lease the next ready job of `kind`.
    ///
    /// The selected job gets a fresh lease token, `attempts + 1`, and a lease
    /// that expires after `lease_duration`. A single UPDATE statement both
    /// selects and claims, so two workers can never lease the same job.
    #[tracing::instrument(skip(self))]
    pub async fn lease(&self, kind: JobKind, lease_duration: Duration) -> Result<Option<Job>> {
        let now = Utc::now();
        let expires_at = now + to_chrono(lease_duration);

        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET state = 'leased',
                attempts = attempts + 1,
                lease_token = ?,
                lease_expires_at = ?,
                updated_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE state = 'queued' AND kind = ? AND available_at <= ?
                ORDER BY available_at ASC, created_at ASC
                LIMIT 1
            )
            AND state = 'queued'
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(expires_at)
        .bind(now)
        .bind(kind.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to lease job")?;

        if let Some(ref job) = job {
            tracing::debug!(
                job_id = %job.id,
                media_id = %job.media_id,
                kind = %kind,
                attempt = job.attempts,
                "Job leased"
            );
        }

        Ok(job)
    }

    /// Mark a leased job succeeded. Returns false if `lease_token` is stale.
    #[tracing::instrument(skip(self))]
    pub async fn ack(&self, id: Uuid, lease_token: Uuid) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'succeeded', lease_token = NULL, lease_expires_at = NULL,
                finished_at = ?, updated_at = ?
            WHERE id = ? AND state = 'leased' AND lease_token = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(lease_token)
        .execute(&self.pool)
        .await
        .context("Failed to ack job")?;

        let acked = result.rows_affected() == 1;
        if !acked {
            tracing::warn!(job_id = %id, "Ack ignored, lease no longer held");
        }
        Ok(acked)
    }

    /// Report a failed attempt.
    ///
    /// Recoverable failures with attempts left are requeued after `backoff`;
    /// anything else fails the job for good. A stale token changes nothing.
    #[tracing::instrument(skip(self, error))]
    pub async fn fail(
        &self,
        id: Uuid,
        lease_token: Uuid,
        error: &str,
        recoverable: bool,
        backoff: Duration,
    ) -> Result<FailOutcome> {
        let mut tx = ImmediateTransaction::begin(&self.pool)
            .await
            .context("Failed to begin transaction for job failure")?;

        let job = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE id = ? AND state = 'leased' AND lease_token = ?",
        )
        .bind(id)
        .bind(lease_token)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to fetch leased job")?;

        let Some(job) = job else {
            tx.rollback().await.context("Failed to roll back")?;
            tracing::warn!(job_id = %id, "Failure report ignored, lease no longer held");
            return Ok(FailOutcome::LeaseLost);
        };

        let now = Utc::now();
        let outcome = if recoverable && job.can_retry() {
            let retry_at = now + to_chrono(backoff);
            sqlx::query(
                r#"
                UPDATE jobs
                SET state = 'queued', last_error = ?, lease_token = NULL,
                    lease_expires_at = NULL, available_at = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(error)
            .bind(retry_at)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("Failed to requeue job")?;

            FailOutcome::Retrying {
                attempt: job.attempts,
                retry_at,
            }
        } else {
            let failed = sqlx::query_as::<_, Job>(
                r#"
                UPDATE jobs
                SET state = 'failed', last_error = ?, lease_token = NULL,
                    lease_expires_at = NULL, finished_at = ?, updated_at = ?
                WHERE id = ?
                RETURNING *
                "#,
            )
            .bind(error)
            .bind(now)
            .bind(now)
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to mark job failed")?;

            FailOutcome::Exhausted(failed)
        };

        tx.commit()
            .await
            .context("Failed to commit job failure")?;

        Ok(outcome)
    }

    /// Return leases that expired before `now` to the queue.
    ///
    /// A job whose final attempt expired fails instead; a job with a pending
    /// cancellation request is cancelled.
    #[tracing::instrument(skip(self))]
    pub async fn requeue_expired_leases(&self, now: DateTime<Utc>) -> Result<ReapReport> {
        let mut tx = ImmediateTransaction::begin(&self.pool)
            .await
            .context("Failed to begin transaction for lease reaping")?;

        let cancelled = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'cancelled', lease_token = NULL, lease_expires_at = NULL,
                finished_at = ?, updated_at = ?
            WHERE state = 'leased' AND lease_expires_at <= ? AND cancel_requested = 1
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to cancel expired jobs")?
        .rows_affected();

        let exhausted = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET state = 'failed', last_error = 'Lease expired on final attempt',
                lease_token = NULL, lease_expires_at = NULL, finished_at = ?, updated_at = ?
            WHERE state = 'leased' AND lease_expires_at <= ? AND attempts >= max_attempts
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .context("Failed to fail exhausted jobs")?;

        let requeued = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'queued', last_error = 'Lease expired', lease_token = NULL,
                lease_expires_at = NULL, available_at = ?, updated_at = ?
            WHERE state = 'leased' AND lease_expires_at <= ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to requeue expired jobs")?
        .rows_affected();

        tx.commit()
            .await
            .context("Failed to commit lease reaping")?;

        if requeued > 0 || cancelled > 0 || !exhausted.is_empty() {
            tracing::info!(
                requeued,
                cancelled,
                exhausted = exhausted.len(),
                "Reaped expired job leases"
            );
        }

        Ok(ReapReport {
            requeued,
            cancelled,
            exhausted,
        })
    }

    /// Cancel a job: queued jobs stop immediately, leased jobs are flagged.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, id: Uuid) -> Result<CancelOutcome> {
        let now = Utc::now();
        let cancelled = sqlx::query(
            "UPDATE jobs SET state = 'cancelled', finished_at = ?, updated_at = ? \
             WHERE id = ? AND state = 'queued'",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to cancel queued job")?;
        if cancelled.rows_affected() == 1 {
            tracing::info!(job_id = %id, "Queued job cancelled");
            return Ok(CancelOutcome::Cancelled);
        }

        let flagged = sqlx::query(
            "UPDATE jobs SET cancel_requested = 1, updated_at = ? WHERE id = ? AND state = 'leased'",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to flag leased job for cancellation")?;
        if flagged.rows_affected() == 1 {
            tracing::info!(job_id = %id, "Cancellation requested for running job");
            return Ok(CancelOutcome::Requested);
        }

        Ok(match self.get(id).await? {
            Some(job) => CancelOutcome::AlreadyFinished { state: job.state },
            None => CancelOutcome::NotFound,
        })
    }

    pub async fn is_cancel_requested(&self, id: Uuid) -> Result<bool> {
        let requested: Option<bool> =
            sqlx::query_scalar("SELECT cancel_requested FROM jobs WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to read cancellation flag")?;
        Ok(requested.unwrap_or(false))
    }

    /// Finish a leased job as cancelled after its handler stopped cooperatively.
    #[tracing::instrument(skip(self))]
    pub async fn mark_cancelled(&self, id: Uuid, lease_token: Uuid) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'cancelled', lease_token = NULL, lease_expires_at = NULL,
                finished_at = ?, updated_at = ?
            WHERE id = ? AND state = 'leased' AND lease_token = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(lease_token)
        .execute(&self.pool)
        .await
        .context("Failed to mark job cancelled")?;
        Ok(result.rows_affected() == 1)
    }

    /// Requeue a failed or cancelled job with a fresh attempt budget.
    ///
    /// Returns `None` if the job is not in a retryable state. Fails if another
    /// job for the same media item and kind is already active.
    #[tracing::instrument(skip(self))]
    pub async fn retry(&self, id: Uuid) -> Result<Option<Job>> {
        let now = Utc::now();
        let retried = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET state = 'queued', attempts = 0, cancel_requested = 0, last_error = NULL,
                available_at = ?, finished_at = NULL, updated_at = ?
            WHERE id = ? AND state IN ('failed', 'cancelled')
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .fetch_optional(&self.pool)
        .await;

        match retried {
            Ok(job) => {
                if let Some(ref job) = job {
                    tracing::info!(job_id = %job.id, media_id = %job.media_id, "Job requeued manually");
                }
                Ok(job)
            }
            Err(err) if is_unique_violation(&err) => Err(anyhow::anyhow!(
                "Another job for the same media item and kind is already active"
            )),
            Err(err) => Err(err).context("Failed to retry job"),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn stats(&self) -> Result<JobStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM jobs GROUP BY state")
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch job stats")?;

        let mut stats = JobStats::default();
        for (state, count) in rows {
            stats.total += count;
            match state.parse::<JobState>()? {
                JobState::Queued => stats.queued = count,
                JobState::Leased => stats.leased = count,
                JobState::Succeeded => stats.succeeded = count,
                JobState::Failed => stats.failed = count,
                JobState::Cancelled => stats.cancelled = count,
            }
        }
        Ok(stats)
    }

    /// Delete succeeded, failed and cancelled jobs that finished before `cutoff`.
    #[tracing::instrument(skip(self))]
    pub async fn delete_finished_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE state IN ('succeeded', 'failed', 'cancelled') \
             AND finished_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .context("Failed to delete finished jobs")?;
        Ok(result.rows_affected())
    }
}
