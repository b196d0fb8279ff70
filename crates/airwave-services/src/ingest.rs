//! Upload intake: validate, dedup, store the original and enqueue the pipeline.

use std::sync::Arc;
use tokio::io::AsyncRead;

use airwave_core::models::{
    DedupPolicy, IngestReceipt, JobPayload, MediaDraft, MediaKind, Reservation,
};
use airwave_core::AppError;
use airwave_db::MediaRepository;
use airwave_processing::IngestValidator;
use airwave_storage::{keys, Storage};
use airwave_worker::JobQueue;

pub const MAX_TITLE_CHARS: usize = 200;
const MAX_TAGS: usize = 20;

/// Descriptive fields supplied with an upload.
#[derive(Debug, Clone, Default)]
pub struct UploadMetadata {
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub uploader: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl UploadMetadata {
    /// Trim fields, drop blank optionals and duplicate tags, and check the title.
    pub fn normalized(self) -> Result<Self, AppError> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(AppError::InvalidInput("Title is required".to_string()));
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(AppError::InvalidInput(format!(
                "Title must be at most {} characters",
                MAX_TITLE_CHARS
            )));
        }

        let mut tags: Vec<String> = Vec::new();
        for tag in self.tags {
            let tag = tag.trim().to_lowercase();
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        if tags.len() > MAX_TAGS {
            return Err(AppError::InvalidInput(format!(
                "At most {} tags are allowed",
                MAX_TAGS
            )));
        }

        Ok(Self {
            title,
            description: non_blank(self.description),
            category: non_blank(self.category),
            tags,
            uploader: non_blank(self.uploader),
        })
    }
}

#[derive(Clone)]
pub struct IngestService {
    media: MediaRepository,
    storage: Arc<dyn Storage>,
    validator: IngestValidator,
    dedup_policy: DedupPolicy,
    queue: Arc<JobQueue>,
}

impl IngestService {
    pub fn new(
        media: MediaRepository,
        storage: Arc<dyn Storage>,
        validator: IngestValidator,
        dedup_policy: DedupPolicy,
        queue: Arc<JobQueue>,
    ) -> Self {
        Self {
            media,
            storage,
            validator,
            dedup_policy,
            queue,
        }
    }

    /// Accept one upload and acknowledge it without waiting for processing.
    ///
    /// Validation failures leave no row and no stored bytes behind. A duplicate
    /// of a live item resolves per the dedup policy and stores nothing.
    #[tracing::instrument(skip(self, reader, metadata), fields(filename = %filename, kind = %kind, media_id = tracing::field::Empty))]
    pub async fn ingest<R>(
        &self,
        reader: R,
        filename: &str,
        kind: MediaKind,
        metadata: UploadMetadata,
    ) -> Result<IngestReceipt, AppError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let metadata = metadata.normalized()?;
        let upload = self
            .validator
            .validate(reader, filename, kind, self.storage.as_ref())
            .await?;

        let draft = MediaDraft {
            content_hash: upload.content_hash.clone(),
            original_filename: filename.to_string(),
            kind,
            format: upload.format,
            size_bytes: upload.size_bytes as i64,
            title: metadata.title,
            description: metadata.description,
            category: metadata.category,
            tags: metadata.tags,
            uploader: metadata.uploader,
        };

        let item = match self.media.lookup_or_reserve(&draft).await? {
            Reservation::Existing(existing) => {
                tracing::Span::current().record("media_id", existing.id.to_string());
                tracing::info!(
                    media_id = %existing.id,
                    content_hash = %draft.content_hash,
                    policy = ?self.dedup_policy,
                    "Upload matches stored content"
                );
                return match self.dedup_policy {
                    DedupPolicy::Reject => Err(AppError::DuplicateContent {
                        existing_id: existing.id,
                    }),
                    DedupPolicy::ReturnExisting => Ok(IngestReceipt {
                        media_id: existing.id,
                        status: existing.status,
                        duplicate: true,
                    }),
                };
            }
            Reservation::Reserved(item) => item,
        };
        tracing::Span::current().record("media_id", item.id.to_string());

        let key = keys::original_key(kind, item.id, upload.format.canonical_extension());
        if let Err(e) = self.storage.commit(upload.staged, &key).await {
            tracing::error!(media_id = %item.id, error = %e, "Failed to store upload, releasing reservation");
            self.release(item.id, None).await;
            return Err(e.into());
        }
        if let Err(e) = self.media.set_original_key(item.id, &key).await {
            self.release(item.id, Some(&key)).await;
            return Err(e);
        }

        if let Err(e) = self.queue.submit(JobPayload::Transcode { media_id: item.id }).await {
            tracing::error!(media_id = %item.id, error = %e, "Failed to enqueue transcode job");
            self.release(item.id, Some(&key)).await;
            return Err(AppError::InternalWithSource {
                message: "Failed to enqueue transcode job".to_string(),
                source: e,
            });
        }

        tracing::info!(
            media_id = %item.id,
            size_bytes = item.size_bytes,
            format = %upload.format,
            key = %key,
            "Upload accepted"
        );

        Ok(IngestReceipt {
            media_id: item.id,
            status: item.status,
            duplicate: false,
        })
    }

    /// Undo a reservation whose upload could not be completed.
    async fn release(&self, media_id: uuid::Uuid, stored_key: Option<&str>) {
        if let Some(key) = stored_key {
            if let Err(e) = self.storage.delete(key).await {
                tracing::warn!(media_id = %media_id, key = %key, error = %e, "Failed to delete stored upload");
            }
        }
        if let Err(e) = self.media.delete_reservation(media_id).await {
            tracing::error!(media_id = %media_id, error = %e, "Failed to release reservation");
        }
    }
}
