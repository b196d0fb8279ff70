//! Job queue: worker pool, lease/ack/fail, timeouts, retry and submission.
//!
//! Shutdown: [`JobQueue::shutdown`] signals the pool to stop claiming; it does
//! not wait for in-flight jobs. A job abandoned mid-run keeps its lease until
//! the lease expires, then the reaper requeues it.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::time::sleep;

use airwave_core::models::{FailOutcome, Job, JobKind, JobPayload};
use airwave_core::{AirwaveConfig, TaskError};
use airwave_db::db::job::ReapReport;
use airwave_db::JobRepository;

use crate::context::{empty_context_weak, JobContext, JobHandlerContext};

/// Maximum delay in seconds before retrying a failed job. Caps exponential backoff
/// so that high attempt counts do not produce excessively long delays.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Computes backoff in seconds for a given retry count (exponential with cap).
#[inline]
pub fn compute_retry_backoff_seconds(retry_count: i32) -> u64 {
    2_u64
        .checked_pow(retry_count.max(0) as u32)
        .unwrap_or(u64::MAX)
        .min(MAX_RETRY_BACKOFF_SECS)
}

#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    pub max_workers: usize,
    pub poll_interval: Duration,
    pub max_attempts: i32,
    pub transcode_timeout: Duration,
    pub intro_timeout: Duration,
    /// Added to a kind's timeout to get its lease duration, so a lease only
    /// expires after the handler has had its full budget.
    pub lease_grace: Duration,
    /// Interval between runs of the expired lease reaper. Zero disables it.
    pub reap_interval: Duration,
    /// Unit of the exponential backoff; zero retries immediately.
    pub backoff_base: Duration,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval: Duration::from_millis(1000),
            max_attempts: 3,
            transcode_timeout: Duration::from_secs(1800),
            intro_timeout: Duration::from_secs(180),
            lease_grace: Duration::from_secs(60),
            reap_interval: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl JobQueueConfig {
    pub fn from_settings(settings: &AirwaveConfig) -> Self {
        Self {
            max_workers: settings.job_max_workers,
            poll_interval: Duration::from_millis(settings.job_poll_interval_ms),
            max_attempts: settings.job_max_attempts,
            transcode_timeout: Duration::from_secs(settings.transcode_timeout_secs),
            intro_timeout: Duration::from_secs(settings.intro_timeout_secs),
            lease_grace: Duration::from_secs(settings.job_lease_grace_secs),
            reap_interval: Duration::from_secs(settings.job_reap_interval_secs),
            ..Self::default()
        }
    }

    /// Wall-clock budget for one run of a job kind.
    pub fn timeout_for(&self, kind: JobKind) -> Duration {
        match kind {
            JobKind::Transcode => self.transcode_timeout,
            JobKind::GenerateIntro => self.intro_timeout,
        }
    }

    pub fn lease_duration_for(&self, kind: JobKind) -> Duration {
        self.timeout_for(kind) + self.lease_grace
    }

    /// Delay before the next attempt after `attempts` runs.
    pub fn retry_backoff(&self, attempts: i32) -> Duration {
        let factor = compute_retry_backoff_seconds(attempts - 1) as u32;
        (self.backoff_base * factor).min(Duration::from_secs(MAX_RETRY_BACKOFF_SECS))
    }
}

/// How one run of a leased job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobRunOutcome {
    Succeeded,
    Retrying { attempt: i32, retry_at: DateTime<Utc> },
    Failed { error: String },
    Cancelled,
    /// The lease expired and was taken over before the result was reported.
    LeaseLost,
}

/// Leases and runs jobs one at a time. The worker pool drives it concurrently;
/// the CLI and tests drive it inline.
#[derive(Clone)]
pub struct Dispatcher {
    repository: JobRepository,
    config: JobQueueConfig,
    context: Weak<dyn JobHandlerContext>,
    next_kind: Arc<AtomicUsize>,
}

impl Dispatcher {
    pub fn new(
        repository: JobRepository,
        config: JobQueueConfig,
        context: Weak<dyn JobHandlerContext>,
    ) -> Self {
        Self {
            repository,
            config,
            context,
            next_kind: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn repository(&self) -> &JobRepository {
        &self.repository
    }

    pub fn config(&self) -> &JobQueueConfig {
        &self.config
    }

    /// Lease the next ready job, rotating the starting kind so one busy kind
    /// cannot starve the other.
    pub async fn lease_next(&self) -> Result<Option<Job>> {
        let start = self.next_kind.fetch_add(1, Ordering::Relaxed);
        for offset in 0..JobKind::ALL.len() {
            let kind = JobKind::ALL[(start + offset) % JobKind::ALL.len()];
            if let Some(job) = self
                .repository
                .lease(kind, self.config.lease_duration_for(kind))
                .await?
            {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    /// Lease and run one job, if any is ready.
    pub async fn run_next(&self) -> Result<Option<(Job, JobRunOutcome)>> {
        let Some(job) = self.lease_next().await? else {
            return Ok(None);
        };
        let outcome = self.process(job.clone()).await?;
        Ok(Some((job, outcome)))
    }

    /// Run ready jobs inline until none are left.
    pub async fn drain(&self) -> Result<Vec<(Job, JobRunOutcome)>> {
        let mut runs = Vec::new();
        while let Some(run) = self.run_next().await? {
            runs.push(run);
        }
        Ok(runs)
    }

    #[tracing::instrument(skip(self, job), fields(job.id = %job.id, job.kind = %job.kind, media_id = %job.media_id, attempt = job.attempts))]
    pub async fn process(&self, job: Job) -> Result<JobRunOutcome> {
        let lease_token = job
            .lease_token
            .ok_or_else(|| anyhow!("Job {} is not leased", job.id))?;

        // Payload schema is checked here, once, before any handler sees it.
        let payload = match job.typed_payload() {
            Ok(payload) => payload,
            Err(e) => {
                let error = format!("Invalid job payload: {}", e);
                tracing::error!(error = %error, "Rejecting job with invalid payload");
                return self.report_failure(&job, lease_token, &error, false).await;
            }
        };

        let context = self.context.upgrade().ok_or_else(|| {
            anyhow!("JobHandlerContext was dropped, cannot process job")
        })?;

        let timeout = self.config.timeout_for(job.kind);
        let job_ctx = JobContext::new(job.clone(), payload, lease_token, self.repository.clone());
        let start = std::time::Instant::now();

        let result = tokio::time::timeout(timeout, context.dispatch_job(&job_ctx)).await;

        match result {
            Ok(Ok(())) => {
                if !self.repository.ack(job.id, lease_token).await? {
                    return Ok(JobRunOutcome::LeaseLost);
                }
                tracing::info!(
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Job completed successfully"
                );
                Ok(JobRunOutcome::Succeeded)
            }
            Ok(Err(e)) => {
                let task_error = e.downcast_ref::<TaskError>();
                if task_error.is_some_and(|te| te.is_cancelled()) {
                    if !self.repository.mark_cancelled(job.id, lease_token).await? {
                        return Ok(JobRunOutcome::LeaseLost);
                    }
                    tracing::info!("Job cancelled");
                    return Ok(JobRunOutcome::Cancelled);
                }

                // Errors not marked otherwise are assumed transient.
                let recoverable = task_error.map(|te| te.is_recoverable()).unwrap_or(true);
                let error = format!("{:#}", e);
                tracing::error!(
                    error = %error,
                    max_attempts = job.max_attempts,
                    unrecoverable = !recoverable,
                    "Job execution failed"
                );
                self.report_failure(&job, lease_token, &error, recoverable).await
            }
            Err(_) => {
                let error = format!(
                    "{} job timed out after {}s",
                    job.kind,
                    timeout.as_secs_f64()
                );
                tracing::error!(timeout_secs = timeout.as_secs_f64(), "Job execution timed out");
                self.report_failure(&job, lease_token, &error, true).await
            }
        }
    }

    async fn report_failure(
        &self,
        job: &Job,
        lease_token: uuid::Uuid,
        error: &str,
        recoverable: bool,
    ) -> Result<JobRunOutcome> {
        let backoff = self.config.retry_backoff(job.attempts);
        let outcome = self
            .repository
            .fail(job.id, lease_token, error, recoverable, backoff)
            .await?;

        match outcome {
            FailOutcome::Retrying { attempt, retry_at } => {
                tracing::info!(
                    job_id = %job.id,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Scheduling job retry"
                );
                Ok(JobRunOutcome::Retrying { attempt, retry_at })
            }
            FailOutcome::Exhausted(failed) => {
                tracing::error!(
                    job_id = %failed.id,
                    media_id = %failed.media_id,
                    attempts = failed.attempts,
                    error = %error,
                    "Job failed, will not retry"
                );
                self.notify_exhausted(&failed, error).await;
                Ok(JobRunOutcome::Failed {
                    error: error.to_string(),
                })
            }
            FailOutcome::LeaseLost => Ok(JobRunOutcome::LeaseLost),
        }
    }

    async fn notify_exhausted(&self, job: &Job, error: &str) {
        let Some(context) = self.context.upgrade() else {
            tracing::warn!(job_id = %job.id, "No handler context to report exhausted job");
            return;
        };
        if let Err(e) = context.job_exhausted(job, error).await {
            tracing::error!(
                job_id = %job.id,
                media_id = %job.media_id,
                error = %e,
                "Failed to apply exhausted job to its media item"
            );
        }
    }

    /// Requeue expired leases; jobs whose final lease expired are failed and
    /// reported to the context.
    pub async fn reap_expired(&self) -> Result<ReapReport> {
        let report = self.repository.requeue_expired_leases(Utc::now()).await?;
        for job in &report.exhausted {
            let error = job.last_error.as_deref().unwrap_or("Lease expired");
            self.notify_exhausted(job, error).await;
        }
        Ok(report)
    }
}

pub struct JobQueue {
    dispatcher: Dispatcher,
    notify: Arc<Notify>,
    shutdown_tx: mpsc::Sender<()>,
}

impl JobQueue {
    /// Create a JobQueue and spawn its worker pool and lease reaper.
    pub fn start(
        repository: JobRepository,
        config: JobQueueConfig,
        context: Weak<dyn JobHandlerContext>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let notify = Arc::new(Notify::new());
        let dispatcher = Dispatcher::new(repository, config, context);

        let pool_dispatcher = dispatcher.clone();
        let pool_notify = notify.clone();
        tokio::spawn(async move {
            Self::worker_pool(pool_dispatcher, pool_notify, shutdown_rx).await;
        });

        Self {
            dispatcher,
            notify,
            shutdown_tx,
        }
    }

    /// Creates a JobQueue that does not spawn a worker. Jobs submitted here
    /// are written to the database and picked up by a running `serve`.
    pub fn new_no_worker(repository: JobRepository, config: JobQueueConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        drop(shutdown_rx);
        Self {
            dispatcher: Dispatcher::new(repository, config, empty_context_weak()),
            notify: Arc::new(Notify::new()),
            shutdown_tx,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Enqueue a job. Idempotent while a job for the same item and kind is active.
    #[tracing::instrument(skip(self), fields(kind = %payload.kind(), media_id = %payload.media_id()))]
    pub async fn submit(&self, payload: JobPayload) -> Result<Job> {
        let job = self
            .dispatcher
            .repository
            .enqueue(&payload, self.dispatcher.config.max_attempts)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to enqueue job");
                e
            })?;

        tracing::info!(job_id = %job.id, state = %job.state, "Job submitted to queue");
        self.notify.notify_one();
        Ok(job)
    }

    async fn worker_pool(dispatcher: Dispatcher, notify: Arc<Notify>, mut shutdown_rx: mpsc::Receiver<()>) {
        let config = dispatcher.config.clone();
        tracing::info!(
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            "Job queue worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers.max(1)));

        let (reaper_shutdown_tx, mut reaper_shutdown_rx) = mpsc::channel::<()>(1);
        if !config.reap_interval.is_zero() {
            let reaper = dispatcher.clone();
            let reap_interval = config.reap_interval;
            let reaper_notify = notify.clone();
            tokio::spawn(async move {
                // First pass one interval in, once the context is fully built.
                let mut interval = tokio::time::interval_at(
                    tokio::time::Instant::now() + reap_interval,
                    reap_interval,
                );
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            match reaper.reap_expired().await {
                                Ok(report) if report.requeued > 0 => reaper_notify.notify_one(),
                                Ok(_) => {}
                                Err(e) => tracing::error!(error = %e, "Expired lease reaper failed"),
                            }
                        }
                        _ = reaper_shutdown_rx.recv() => break,
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Job queue worker pool shutting down");
                    let _ = reaper_shutdown_tx.send(()).await;
                    break;
                }
                _ = notify.notified() => {
                    Self::claim_and_dispatch(&dispatcher, &semaphore, &notify).await;
                }
                _ = sleep(config.poll_interval) => {
                    Self::claim_and_dispatch(&dispatcher, &semaphore, &notify).await;
                }
            }
        }

        tracing::info!("Job queue worker pool stopped");
    }

    /// Claim ready jobs until the queue is empty or every worker slot is busy.
    async fn claim_and_dispatch(dispatcher: &Dispatcher, semaphore: &Arc<Semaphore>, notify: &Arc<Notify>) {
        loop {
            let permit = match semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::debug!("No workers available, skipping claim");
                    return;
                }
            };

            match dispatcher.lease_next().await {
                Ok(Some(job)) => {
                    let worker = dispatcher.clone();
                    let done = notify.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(e) = worker.process(job).await {
                            tracing::error!(error = %e, "Job processing failed");
                        }
                        // A slot just freed up.
                        done.notify_one();
                    });
                }
                Ok(None) => {
                    tracing::trace!("No jobs available in queue");
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to lease job from queue");
                    return;
                }
            }
        }
    }

    /// Signals the worker pool to stop claiming new jobs and exit the main loop.
    ///
    /// Returns immediately; already-spawned handlers keep running until they
    /// finish or hit their timeout.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating job queue shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}
