//! Intro handler: voice a host intro for a transcoded item, then approve it.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Local, Timelike};
use std::sync::Arc;

use airwave_core::models::{Job, MediaStatus};
use airwave_core::{TaskError, TaskResultExt};
use airwave_processing::{compose_intro, IntroRequest, Personality};
use airwave_storage::keys;
use airwave_worker::JobContext;

use super::JobHandler;
use crate::state::AppState;

pub struct IntroHandler;

#[async_trait]
impl JobHandler for IntroHandler {
    #[tracing::instrument(skip(self, job, state), fields(job.id = %job.job().id, media_id = %job.media_id(), attempt = job.attempt()))]
    async fn process(&self, job: &JobContext, state: Arc<AppState>) -> Result<()> {
        let item = state
            .media
            .get(job.media_id())
            .await?
            .ok_or_else(|| anyhow!("Media item {} not found", job.media_id()))
            .unrecoverable()?;

        match item.status {
            MediaStatus::AwaitingIntro => {}
            MediaStatus::Approved | MediaStatus::Archived => {
                tracing::info!(media_id = %item.id, status = %item.status, "Intro already settled");
                return Ok(());
            }
            status => {
                return Err(TaskError::unrecoverable(anyhow!(
                    "Media item {} is not awaiting an intro (status {})",
                    item.id,
                    status
                ))
                .into())
            }
        }

        let personality = Personality::for_hour(Local::now().hour(), &mut rand::rng());
        let request = IntroRequest {
            title: item.title.clone(),
            creator: item.uploader.clone(),
            kind: item.kind,
            description: item.description.clone(),
        };

        let intro = compose_intro(state.narration.as_ref(), &request, personality)
            .await
            .map_err(|e| TaskError::recoverable(anyhow!("Intro generation failed: {}", e)))?;

        job.ensure_not_cancelled("store_intro").await?;

        // Fixed key, so a rerun overwrites rather than accumulates.
        let key = keys::intro_key(item.id);
        state.storage.put(&key, intro.audio.clone()).await?;
        state.media.set_intro(item.id, &intro.text, &key).await?;

        let note = if intro.used_fallback {
            "intro ready (template text)"
        } else {
            "intro ready"
        };
        state
            .media
            .transition(item.id, MediaStatus::Approved, Some(note))
            .await?;

        tracing::info!(
            media_id = %item.id,
            personality = %intro.personality,
            used_fallback = intro.used_fallback,
            audio_bytes = intro.audio.len(),
            "Media item approved with intro"
        );
        Ok(())
    }

    /// Losing the intro is not worth losing the item: approve it without one.
    async fn exhausted(&self, job: &Job, error: &str, state: Arc<AppState>) -> Result<()> {
        let item = state.media.get_required(job.media_id).await?;
        if item.status != MediaStatus::AwaitingIntro {
            tracing::warn!(
                media_id = %item.id,
                status = %item.status,
                "Intro job failed after the item left AwaitingIntro"
            );
            return Ok(());
        }

        let note = format!("approved without intro: {}", error);
        state
            .media
            .transition(item.id, MediaStatus::Approved, Some(&note))
            .await?;
        tracing::warn!(
            media_id = %item.id,
            job_id = %job.id,
            attempts = job.attempts,
            error = %error,
            "Intro generation exhausted, approved without intro"
        );
        Ok(())
    }
}
