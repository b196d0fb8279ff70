//! Operator actions on a media item's lifecycle.

use serde::Serialize;
use std::sync::Arc;
use tokio::io::AsyncRead;
use uuid::Uuid;

use airwave_core::models::{Job, JobPayload, MediaDraft, MediaItem, MediaStatus, MediaTransition};
use airwave_core::AppError;
use airwave_db::db::media::{RetryReset, SourceReplacement};
use airwave_db::{JobRepository, MediaRepository};
use airwave_processing::IngestValidator;
use airwave_storage::{keys, Storage};
use airwave_worker::JobQueue;

/// An item with its transition history and jobs.
#[derive(Debug, Serialize)]
pub struct MediaReport {
    pub item: MediaItem,
    pub history: Vec<MediaTransition>,
    pub jobs: Vec<Job>,
}

#[derive(Clone)]
pub struct LifecycleService {
    media: MediaRepository,
    jobs: JobRepository,
    storage: Arc<dyn Storage>,
    validator: IngestValidator,
    queue: Arc<JobQueue>,
}

impl LifecycleService {
    pub fn new(
        media: MediaRepository,
        jobs: JobRepository,
        storage: Arc<dyn Storage>,
        validator: IngestValidator,
        queue: Arc<JobQueue>,
    ) -> Self {
        Self {
            media,
            jobs,
            storage,
            validator,
            queue,
        }
    }

    pub async fn status(&self, media_id: Uuid) -> Result<MediaReport, AppError> {
        let item = self.media.get_required(media_id).await?;
        let history = self.media.history(media_id).await?;
        let jobs = self.jobs.list_for_media(media_id).await?;
        Ok(MediaReport { item, history, jobs })
    }

    /// Failed -> Pending with the stored original, then a fresh transcode job.
    #[tracing::instrument(skip(self), fields(media_id = %media_id))]
    pub async fn retry_failed(&self, media_id: Uuid) -> Result<MediaItem, AppError> {
        let item = self.media.get_required(media_id).await?;
        item.status.transition(MediaStatus::Pending)?;
        if item.original_key.is_none() {
            return Err(AppError::NotEligible(format!(
                "Media item {} has no stored original; retry with a replacement source",
                media_id
            )));
        }

        let item = match self.media.reset_for_retry(media_id, None).await? {
            RetryReset::Reset(item) => item,
            RetryReset::Duplicate(existing) => {
                return Err(AppError::DuplicateContent {
                    existing_id: existing.id,
                })
            }
        };
        self.requeue(item).await
    }

    /// Failed -> Pending with a corrected source.
    ///
    /// The replacement goes through the same validation as an upload and must
    /// not duplicate another live item. It is stored under a fresh key before
    /// the reset, so the item row never points at bytes that are not on disk
    /// and a refused replacement leaves the old original in place.
    #[tracing::instrument(skip(self, reader), fields(media_id = %media_id, filename = %filename))]
    pub async fn retry_with_source<R>(
        &self,
        media_id: Uuid,
        reader: R,
        filename: &str,
    ) -> Result<MediaItem, AppError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let item = self.media.get_required(media_id).await?;
        item.status.transition(MediaStatus::Pending)?;

        let upload = self
            .validator
            .validate(reader, filename, item.kind, self.storage.as_ref())
            .await?;
        let original_key =
            keys::replacement_key(item.kind, item.id, upload.format.canonical_extension());
        self.storage.commit(upload.staged, &original_key).await?;

        let replacement = SourceReplacement {
            draft: MediaDraft {
                content_hash: upload.content_hash.clone(),
                original_filename: filename.to_string(),
                kind: item.kind,
                format: upload.format,
                size_bytes: upload.size_bytes as i64,
                title: item.title.clone(),
                description: item.description.clone(),
                category: item.category.clone(),
                tags: item.tags.clone(),
                uploader: item.uploader.clone(),
            },
            original_key: original_key.clone(),
        };

        let reset = match self.media.reset_for_retry(media_id, Some(&replacement)).await {
            Ok(RetryReset::Reset(reset)) => reset,
            Ok(RetryReset::Duplicate(existing)) => {
                tracing::info!(
                    media_id = %media_id,
                    existing_id = %existing.id,
                    "Replacement source duplicates a stored item"
                );
                self.discard(&original_key).await;
                return Err(AppError::DuplicateContent {
                    existing_id: existing.id,
                });
            }
            Err(e) => {
                self.discard(&original_key).await;
                return Err(e);
            }
        };

        if let Some(old_key) = item.original_key.as_deref() {
            self.discard(old_key).await;
        }
        self.requeue(reset).await
    }

    async fn discard(&self, key: &str) {
        if let Err(e) = self.storage.delete(key).await {
            tracing::warn!(key = %key, error = %e, "Failed to delete source file");
        }
    }

    /// Enqueue the transcode job for a reset item. If the job cannot be
    /// queued the item goes back to Failed so it can be retried again.
    async fn requeue(&self, item: MediaItem) -> Result<MediaItem, AppError> {
        match self.queue.submit(JobPayload::Transcode { media_id: item.id }).await {
            Ok(job) => {
                tracing::info!(media_id = %item.id, job_id = %job.id, "Media item requeued for processing");
                Ok(item)
            }
            Err(e) => {
                let reason = format!("Failed to enqueue transcode job: {:#}", e);
                match self.media.abandon_retry(item.id, &reason).await {
                    Ok(_) => tracing::warn!(
                        media_id = %item.id,
                        error = %reason,
                        "Retry not queued, item failed again"
                    ),
                    Err(abandon_err) => tracing::error!(
                        media_id = %item.id,
                        error = %abandon_err,
                        "Retry not queued and item could not be returned to failed"
                    ),
                }
                Err(AppError::InternalWithSource {
                    message: "Failed to enqueue transcode job".to_string(),
                    source: e,
                })
            }
        }
    }
}
