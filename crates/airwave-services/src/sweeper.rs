//! Retention sweeper.
//!
//! Archives approved items that were never played and sit on no playlist once
//! they are older than the retention window, deleting their artifacts. The same
//! pass deletes finished jobs and stale non-current playlists.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use airwave_core::{AirwaveConfig, AppError};
use airwave_db::{JobRepository, MediaRepository, PlaylistRepository};
use airwave_storage::Storage;

const SWEEP_BATCH: i64 = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub archived: usize,
    pub artifacts_deleted: usize,
    pub jobs_deleted: u64,
    pub playlists_deleted: u64,
}

#[derive(Clone)]
pub struct RetentionSweeper {
    media: MediaRepository,
    jobs: JobRepository,
    playlists: PlaylistRepository,
    storage: Arc<dyn Storage>,
    retention_days: i64,
    job_retention_days: i64,
    playlist_retention_days: i64,
    current_playlist: String,
    interval: Duration,
}

fn cutoff(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    if days <= 0 {
        return None;
    }
    ChronoDuration::try_days(days).and_then(|window| now.checked_sub_signed(window))
}

impl RetentionSweeper {
    pub fn new(
        media: MediaRepository,
        jobs: JobRepository,
        playlists: PlaylistRepository,
        storage: Arc<dyn Storage>,
        settings: &AirwaveConfig,
    ) -> Self {
        Self {
            media,
            jobs,
            playlists,
            storage,
            retention_days: settings.retention_days,
            job_retention_days: settings.job_retention_days,
            playlist_retention_days: settings.playlist_retention_days,
            current_playlist: settings.current_playlist.clone(),
            interval: Duration::from_secs(settings.sweep_interval_secs.max(1)),
        }
    }

    /// Run the sweep every interval until `shutdown` is cancelled. A sweep
    /// in progress is allowed to finish.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut sweep_interval = interval(self.interval);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Retention sweeper stopped");
                        break;
                    }
                    _ = sweep_interval.tick() => {}
                }

                tracing::info!("Starting scheduled retention sweep");
                match self.sweep().await {
                    Ok(report) => tracing::info!(
                        archived = report.archived,
                        artifacts_deleted = report.artifacts_deleted,
                        jobs_deleted = report.jobs_deleted,
                        playlists_deleted = report.playlists_deleted,
                        "Retention sweep completed"
                    ),
                    Err(e) => tracing::error!(error = %e, "Retention sweep failed"),
                }
            }
        })
    }

    pub async fn sweep(&self) -> Result<SweepReport, AppError> {
        self.sweep_at(Utc::now()).await
    }

    #[tracing::instrument(skip(self), fields(cleanup.operation = "sweep"))]
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, AppError> {
        let mut report = SweepReport::default();

        if let Some(cutoff) = cutoff(now, self.retention_days) {
            self.archive_stale(cutoff, &mut report).await?;
        }

        if let Some(cutoff) = cutoff(now, self.job_retention_days) {
            match self.jobs.delete_finished_older_than(cutoff).await {
                Ok(count) => report.jobs_deleted = count,
                Err(e) => tracing::error!(error = %e, "Failed to delete finished jobs"),
            }
        }

        if let Some(cutoff) = cutoff(now, self.playlist_retention_days) {
            match self
                .playlists
                .delete_older_than(cutoff, &self.current_playlist)
                .await
            {
                Ok(count) => report.playlists_deleted = count,
                Err(e) => tracing::error!(error = %e, "Failed to delete stale playlists"),
            }
        }

        Ok(report)
    }

    async fn archive_stale(&self, cutoff: DateTime<Utc>, report: &mut SweepReport) -> Result<(), AppError> {
        loop {
            let candidates = self.media.archive_candidates(cutoff, SWEEP_BATCH).await?;
            if candidates.is_empty() {
                return Ok(());
            }

            let mut archived_in_batch = 0;
            for candidate in candidates {
                // The guard is checked again under the write lock.
                let Some(before) = self.media.archive_if_unreferenced(candidate.id, cutoff).await? else {
                    tracing::debug!(media_id = %candidate.id, "Item referenced since selection, kept");
                    continue;
                };
                archived_in_batch += 1;
                report.archived += 1;

                for key in before.artifact_keys() {
                    match self.storage.delete(key).await {
                        Ok(()) => report.artifacts_deleted += 1,
                        Err(e) => tracing::error!(
                            error = %e,
                            media_id = %before.id,
                            storage_key = %key,
                            "Failed to delete artifact of archived item"
                        ),
                    }
                }
                tracing::info!(
                    media_id = %before.id,
                    created_at = %before.created_at,
                    "Archived unplayed item"
                );
            }

            if archived_in_batch == 0 {
                return Ok(());
            }
        }
    }
}
