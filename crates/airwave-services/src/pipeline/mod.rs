//! Job handlers for the media pipeline, and the dispatch from leased jobs to them.
//!
//! Handlers resume from whatever status the item is in, so a job that runs
//! twice (expired lease, crash before ack) converges on the same artifacts.

mod intro;
mod transcode;

pub use intro::IntroHandler;
pub use transcode::TranscodeHandler;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use airwave_core::models::{Job, JobKind, JobPayload};
use airwave_worker::{JobContext, JobHandlerContext};

use crate::state::AppState;

/// One job kind's work.
#[async_trait]
pub trait JobHandler {
    async fn process(&self, job: &JobContext, state: Arc<AppState>) -> Result<()>;

    /// The job failed for good; bring the media item to its resting state.
    async fn exhausted(&self, job: &Job, error: &str, state: Arc<AppState>) -> Result<()>;
}

#[async_trait]
impl JobHandlerContext for AppState {
    async fn dispatch_job(self: Arc<Self>, job: &JobContext) -> Result<()> {
        match job.payload() {
            JobPayload::Transcode { .. } => TranscodeHandler.process(job, self).await,
            JobPayload::GenerateIntro { .. } => IntroHandler.process(job, self).await,
        }
    }

    async fn job_exhausted(self: Arc<Self>, job: &Job, error: &str) -> Result<()> {
        match job.kind {
            JobKind::Transcode => TranscodeHandler.exhausted(job, error, self).await,
            JobKind::GenerateIntro => IntroHandler.exhausted(job, error, self).await,
        }
    }
}
