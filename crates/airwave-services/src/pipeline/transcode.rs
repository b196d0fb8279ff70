//! Transcode handler: Pending -> Validating -> Transcoding -> AwaitingIntro.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use airwave_core::models::{Job, JobPayload, MediaItem, MediaKind, MediaStatus};
use airwave_core::{TaskError, TaskResultExt};
use airwave_processing::transcoder::thumbnail_offset;
use airwave_processing::TranscodeError;
use airwave_storage::keys;
use airwave_worker::JobContext;

use super::JobHandler;
use crate::state::AppState;

pub struct TranscodeHandler;

/// ffprobe or ffmpeg missing from the host is worth retrying; anything the
/// tool said about the input is not.
fn probe_failure(err: TranscodeError) -> TaskError {
    match err {
        TranscodeError::Spawn { .. } => TaskError::recoverable(anyhow!("Probe failed: {}", err)),
        other => TaskError::unrecoverable(anyhow!("Probe failed: {}", other)),
    }
}

impl TranscodeHandler {
    /// Probe the stored original and check it against the item's kind and the
    /// duration ceiling. Ends in Transcoding.
    async fn validate(&self, job: &JobContext, item: &MediaItem, state: &AppState) -> Result<MediaItem> {
        let original_key = item
            .original_key
            .as_deref()
            .ok_or_else(|| anyhow!("Media item {} has no stored original", item.id))
            .unrecoverable()?;
        let input = state.storage.resolve(original_key).unrecoverable()?;

        let probe = state
            .transcoder
            .probe(&input)
            .await
            .map_err(probe_failure)?;

        if !probe.matches_kind(item.kind) {
            return Err(TaskError::unrecoverable(anyhow!(
                "No {} stream found in {}",
                item.kind,
                item.original_filename
            ))
            .into());
        }
        if let Some(duration) = probe.duration_secs {
            if duration > state.settings.max_duration_secs {
                return Err(TaskError::unrecoverable(anyhow!(
                    "Duration {:.1}s exceeds the {:.0}s limit",
                    duration,
                    state.settings.max_duration_secs
                ))
                .into());
            }
            state.media.set_duration(item.id, duration).await?;
        }

        tracing::info!(
            media_id = %item.id,
            duration_secs = ?probe.duration_secs,
            format = ?probe.format_name,
            audio_codec = ?probe.audio_codec,
            video_codec = ?probe.video_codec,
            "Original validated"
        );

        job.ensure_not_cancelled("transcode").await?;
        let item = state
            .media
            .transition(item.id, MediaStatus::Transcoding, None)
            .await?;
        Ok(item)
    }

    /// Produce the normalized artifact (and a thumbnail for video). Ends in
    /// AwaitingIntro with the intro job enqueued.
    async fn transcode(&self, job: &JobContext, item: &MediaItem, state: &AppState) -> Result<()> {
        let original_key = item
            .original_key
            .as_deref()
            .ok_or_else(|| anyhow!("Media item {} has no stored original", item.id))
            .unrecoverable()?;
        let input = state.storage.resolve(original_key).unrecoverable()?;

        let output_key = keys::transcoded_key(item.kind, item.id);
        let output = state.storage.temp_for(&output_key).await?;
        let start = std::time::Instant::now();
        state
            .transcoder
            .transcode(item.kind, &input, &output)
            .await
            .map_err(|e| TaskError::recoverable(anyhow!("Transcode failed: {}", e)))?;
        let size = state.storage.commit(output, &output_key).await?;
        tracing::info!(
            media_id = %item.id,
            key = %output_key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Transcoded artifact stored"
        );

        let thumbnail = match item.kind {
            MediaKind::Video => self.thumbnail(item, &input, state).await,
            MediaKind::Audio => None,
        };
        state
            .media
            .set_transcoded(item.id, &output_key, thumbnail.as_deref())
            .await?;

        job.ensure_not_cancelled("intro").await?;
        state
            .media
            .transition(item.id, MediaStatus::AwaitingIntro, None)
            .await?;
        self.enqueue_intro(item.id, state).await
    }

    /// A missing thumbnail does not hold up the item.
    async fn thumbnail(&self, item: &MediaItem, input: &std::path::Path, state: &AppState) -> Option<String> {
        let key = keys::thumbnail_key(item.id);
        let result: Result<()> = async {
            let output = state.storage.temp_for(&key).await?;
            let at = thumbnail_offset(item.duration_secs);
            state.transcoder.thumbnail(input, &output, at).await?;
            state.storage.commit(output, &key).await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => Some(key),
            Err(e) => {
                tracing::warn!(media_id = %item.id, error = %e, "Thumbnail generation failed");
                None
            }
        }
    }

    async fn enqueue_intro(&self, media_id: Uuid, state: &AppState) -> Result<()> {
        let job = state
            .queue
            .submit(JobPayload::GenerateIntro { media_id })
            .await
            .context("Failed to enqueue intro job")?;
        tracing::debug!(media_id = %media_id, job_id = %job.id, "Intro job enqueued");
        Ok(())
    }
}

#[async_trait]
impl JobHandler for TranscodeHandler {
    #[tracing::instrument(skip(self, job, state), fields(job.id = %job.job().id, media_id = %job.media_id(), attempt = job.attempt()))]
    async fn process(&self, job: &JobContext, state: Arc<AppState>) -> Result<()> {
        let mut item = state
            .media
            .get(job.media_id())
            .await?
            .ok_or_else(|| anyhow!("Media item {} not found", job.media_id()))
            .unrecoverable()?;

        if item.status == MediaStatus::Pending {
            job.ensure_not_cancelled("validate").await?;
            item = state
                .media
                .transition(item.id, MediaStatus::Validating, None)
                .await?;
        }
        if item.status == MediaStatus::Validating {
            item = self.validate(job, &item, &state).await?;
        }

        match item.status {
            MediaStatus::Transcoding => self.transcode(job, &item, &state).await,
            MediaStatus::AwaitingIntro => {
                // Transcoded earlier; the intro job may not have been enqueued.
                tracing::info!(media_id = %item.id, "Already transcoded");
                self.enqueue_intro(item.id, &state).await
            }
            MediaStatus::Approved | MediaStatus::Archived => {
                tracing::info!(media_id = %item.id, status = %item.status, "Nothing to transcode");
                Ok(())
            }
            status => Err(TaskError::unrecoverable(anyhow!(
                "Media item {} cannot be transcoded from status {}",
                item.id,
                status
            ))
            .into()),
        }
    }

    async fn exhausted(&self, job: &Job, error: &str, state: Arc<AppState>) -> Result<()> {
        let item = state.media.get_required(job.media_id).await?;
        if item.status == MediaStatus::Pending {
            // Failed is only reachable from a pipeline stage.
            state
                .media
                .transition(item.id, MediaStatus::Validating, Some("transcode job failed before validation"))
                .await?;
        } else if !matches!(item.status, MediaStatus::Validating | MediaStatus::Transcoding) {
            tracing::warn!(
                media_id = %item.id,
                status = %item.status,
                "Transcode job failed after the item left the pipeline"
            );
            return Ok(());
        }

        state
            .media
            .transition(item.id, MediaStatus::Failed, Some(error))
            .await?;
        tracing::error!(
            media_id = %item.id,
            job_id = %job.id,
            attempts = job.attempts,
            error = %error,
            "Media item failed"
        );
        Ok(())
    }
}
