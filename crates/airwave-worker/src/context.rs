//! Job handler context
//!
//! The services layer implements [`JobHandlerContext`] for its pipeline state.
//! The dispatcher calls `dispatch_job` for every leased job; the implementation
//! matches on the typed payload and runs the matching handler.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use uuid::Uuid;

use airwave_core::models::{Job, JobPayload};
use airwave_core::TaskError;
use airwave_db::JobRepository;

/// Context for job dispatch.
#[async_trait]
pub trait JobHandlerContext: Send + Sync {
    /// Run one leased job. Return a [`TaskError`] (through `anyhow`) to choose
    /// between retry, immediate failure and cancellation; any other error is
    /// treated as recoverable.
    async fn dispatch_job(self: Arc<Self>, job: &JobContext) -> Result<()>;

    /// A job failed for good: attempts exhausted, unrecoverable error, or its
    /// final lease expired. The owning media item must be updated.
    async fn job_exhausted(self: Arc<Self>, job: &Job, error: &str) -> Result<()>;
}

/// One leased job as seen by a handler.
pub struct JobContext {
    job: Job,
    payload: JobPayload,
    lease_token: Uuid,
    repository: JobRepository,
}

impl JobContext {
    pub fn new(job: Job, payload: JobPayload, lease_token: Uuid, repository: JobRepository) -> Self {
        Self {
            job,
            payload,
            lease_token,
            repository,
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    /// The payload, already checked against the job row at lease time.
    pub fn payload(&self) -> &JobPayload {
        &self.payload
    }

    pub fn media_id(&self) -> Uuid {
        self.job.media_id
    }

    pub fn lease_token(&self) -> Uuid {
        self.lease_token
    }

    /// 1-based attempt number of this run.
    pub fn attempt(&self) -> i32 {
        self.job.attempts
    }

    pub fn is_final_attempt(&self) -> bool {
        self.job.attempts >= self.job.max_attempts
    }

    /// Cooperative cancellation point, checked between stages.
    pub async fn ensure_not_cancelled(&self, next_stage: &str) -> Result<(), TaskError> {
        match self.repository.is_cancel_requested(self.job.id).await {
            Ok(true) => {
                tracing::info!(
                    job_id = %self.job.id,
                    media_id = %self.job.media_id,
                    stage = next_stage,
                    "Cancellation observed"
                );
                Err(TaskError::cancelled(next_stage))
            }
            Ok(false) => Ok(()),
            Err(e) => Err(TaskError::recoverable(e.context("Failed to check cancellation"))),
        }
    }
}

/// Placeholder context for queues that only submit work (e.g. the CLI's
/// `ingest`). Dispatch always errors.
struct NoopContext;

#[async_trait]
impl JobHandlerContext for NoopContext {
    async fn dispatch_job(self: Arc<Self>, _job: &JobContext) -> Result<()> {
        Err(anyhow::anyhow!("NoopContext: no handler context available"))
    }

    async fn job_exhausted(self: Arc<Self>, _job: &Job, _error: &str) -> Result<()> {
        Ok(())
    }
}

/// Returns a weak reference to a no-op context, for queues built without workers.
pub fn empty_context_weak() -> Weak<dyn JobHandlerContext> {
    let n: Arc<dyn JobHandlerContext> = Arc::new(NoopContext);
    Arc::downgrade(&n)
}
