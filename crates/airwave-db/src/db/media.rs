use airwave_core::models::{
    MediaDraft, MediaItem, MediaKind, MediaStatus, MediaTransition, Reservation,
};
use airwave_core::AppError;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::transaction::{is_unique_violation, retry_write, ImmediateTransaction};

/// Replacement source for a failed item being retried.
#[derive(Debug, Clone)]
pub struct SourceReplacement {
    pub draft: MediaDraft,
    pub original_key: String,
}

/// Outcome of resetting a failed item for another pipeline run.
#[derive(Debug, Clone)]
pub enum RetryReset {
    Reset(MediaItem),
    /// The replacement's content hash belongs to another live item.
    Duplicate(MediaItem),
}

/// Repository for media items, the dedup index and the transition history
#[derive(Clone)]
pub struct MediaRepository {
    pool: SqlitePool,
}

pub(crate) async fn fetch_item(
    conn: &mut SqliteConnection,
    id: Uuid,
) -> Result<Option<MediaItem>, AppError> {
    let item = sqlx::query_as::<_, MediaItem>("SELECT * FROM media_items WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(item)
}

async fn fetch_live_by_hash(
    conn: &mut SqliteConnection,
    content_hash: &str,
) -> Result<Option<MediaItem>, AppError> {
    let item = sqlx::query_as::<_, MediaItem>(
        "SELECT * FROM media_items WHERE content_hash = ? AND status <> 'archived'",
    )
    .bind(content_hash)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(item)
}

async fn insert_transition(
    conn: &mut SqliteConnection,
    media_id: Uuid,
    from: Option<MediaStatus>,
    to: MediaStatus,
    note: Option<&str>,
    at: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO media_transitions (media_id, from_status, to_status, note, at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(media_id)
    .bind(from.map(|s| s.as_str()))
    .bind(to.as_str())
    .bind(note)
    .bind(at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Validate `current -> to` against the lifecycle table, then write it with its history row.
pub(crate) async fn apply_transition(
    conn: &mut SqliteConnection,
    id: Uuid,
    to: MediaStatus,
    note: Option<&str>,
) -> Result<MediaItem, AppError> {
    let current = fetch_item(conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Media item {} not found", id)))?;
    let next = current.status.transition(to)?;
    let now = Utc::now();

    let last_error = match next {
        MediaStatus::Failed => note.map(str::to_string),
        MediaStatus::Pending => None,
        _ => current.last_error.clone(),
    };
    let processed_at = if next == MediaStatus::Approved {
        Some(now)
    } else {
        current.processed_at
    };

    let item = sqlx::query_as::<_, MediaItem>(
        "UPDATE media_items SET status = ?, last_error = ?, processed_at = ?, updated_at = ? \
         WHERE id = ? AND status = ? RETURNING *",
    )
    .bind(next.as_str())
    .bind(last_error)
    .bind(processed_at)
    .bind(now)
    .bind(id)
    .bind(current.status.as_str())
    .fetch_one(&mut *conn)
    .await?;

    insert_transition(conn, id, Some(current.status), next, note, now).await?;

    tracing::debug!(
        media_id = %id,
        from = %current.status,
        to = %next,
        "Media status changed"
    );

    Ok(item)
}

/// Bump play statistics for an item consumed from a playlist.
pub(crate) async fn record_play(
    conn: &mut SqliteConnection,
    id: Uuid,
    at: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE media_items SET played_count = played_count + 1, last_played_at = ?, \
         updated_at = ? WHERE id = ?",
    )
    .bind(at)
    .bind(at)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

const ARCHIVE_GUARD: &str = "status = 'approved' AND created_at < ? AND played_count = 0 \
     AND NOT EXISTS (SELECT 1 FROM playlist_entries pe WHERE pe.media_id = media_items.id)";

impl MediaRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Atomically return the live item with the draft's content hash, or create
    /// a Pending item for it.
    ///
    /// Concurrent callers with identical content serialize on the write lock,
    /// so exactly one of them gets [`Reservation::Reserved`].
    #[tracing::instrument(
        skip(self, draft),
        fields(db.table = "media_items", db.operation = "reserve", content_hash = %draft.content_hash)
    )]
    pub async fn lookup_or_reserve(&self, draft: &MediaDraft) -> Result<Reservation, AppError> {
        retry_write("lookup_or_reserve", move || async move {
            let mut tx = ImmediateTransaction::begin(&self.pool).await?;
            let result = Self::reserve_in_tx(&mut tx, draft).await;
            tx.finish(result).await
        })
        .await
    }

    async fn reserve_in_tx(
        conn: &mut SqliteConnection,
        draft: &MediaDraft,
    ) -> Result<Reservation, AppError> {
        if let Some(existing) = fetch_live_by_hash(conn, &draft.content_hash).await? {
            return Ok(Reservation::Existing(existing));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let tags = serde_json::to_string(&draft.tags)?;

        let inserted = sqlx::query_as::<_, MediaItem>(
            r#"
            INSERT INTO media_items (
                id, content_hash, original_filename, kind, status, mime_type, size_bytes,
                title, description, category, tags, uploader, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&draft.content_hash)
        .bind(&draft.original_filename)
        .bind(draft.kind.as_str())
        .bind(MediaStatus::Pending.as_str())
        .bind(draft.mime_type())
        .bind(draft.size_bytes)
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(&draft.category)
        .bind(tags)
        .bind(&draft.uploader)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await;

        match inserted {
            Ok(item) => {
                insert_transition(conn, id, None, MediaStatus::Pending, Some("ingested"), now)
                    .await?;
                Ok(Reservation::Reserved(item))
            }
            Err(err) if is_unique_violation(&err) => {
                let existing = fetch_live_by_hash(conn, &draft.content_hash)
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal("Dedup index conflict without a live row".to_string())
                    })?;
                Ok(Reservation::Existing(existing))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Remove a reservation whose artifact could not be stored.
    #[tracing::instrument(skip(self), fields(db.table = "media_items", db.operation = "delete", db.record_id = %id))]
    pub async fn delete_reservation(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM media_items WHERE id = ? AND status = 'pending'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "media_items", db.operation = "select", db.record_id = %id))]
    pub async fn get(&self, id: Uuid) -> Result<Option<MediaItem>, AppError> {
        let mut conn = self.pool.acquire().await?;
        fetch_item(&mut conn, id).await
    }

    /// Like [`Self::get`], but a missing item is [`AppError::NotFound`].
    pub async fn get_required(&self, id: Uuid) -> Result<MediaItem, AppError> {
        self.get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Media item {} not found", id)))
    }

    pub async fn find_live_by_hash(&self, content_hash: &str) -> Result<Option<MediaItem>, AppError> {
        let mut conn = self.pool.acquire().await?;
        fetch_live_by_hash(&mut conn, content_hash).await
    }

    /// Apply a lifecycle transition. Illegal pairs fail with
    /// [`AppError::InvalidTransition`] and leave the row untouched.
    #[tracing::instrument(skip(self), fields(db.table = "media_items", db.operation = "transition", db.record_id = %id))]
    pub async fn transition(
        &self,
        id: Uuid,
        to: MediaStatus,
        note: Option<&str>,
    ) -> Result<MediaItem, AppError> {
        retry_write("media_transition", move || async move {
            let mut tx = ImmediateTransaction::begin(&self.pool).await?;
            let result = apply_transition(&mut tx, id, to, note).await;
            tx.finish(result).await
        })
        .await
    }

    #[tracing::instrument(skip(self), fields(db.table = "media_items", db.operation = "update", db.record_id = %id))]
    pub async fn set_original_key(&self, id: Uuid, key: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE media_items SET original_key = ?, updated_at = ? WHERE id = ?")
            .bind(key)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "media_items", db.operation = "update", db.record_id = %id))]
    pub async fn set_duration(&self, id: Uuid, duration_secs: f64) -> Result<(), AppError> {
        sqlx::query("UPDATE media_items SET duration_secs = ?, updated_at = ? WHERE id = ?")
            .bind(duration_secs)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record the normalized artifact (and video thumbnail) produced by the transcoder.
    #[tracing::instrument(skip(self), fields(db.table = "media_items", db.operation = "update", db.record_id = %id))]
    pub async fn set_transcoded(
        &self,
        id: Uuid,
        transcoded_key: &str,
        thumbnail_key: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE media_items SET transcoded_key = ?, thumbnail_key = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(transcoded_key)
        .bind(thumbnail_key)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, intro_text), fields(db.table = "media_items", db.operation = "update", db.record_id = %id))]
    pub async fn set_intro(
        &self,
        id: Uuid,
        intro_text: &str,
        intro_audio_key: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE media_items SET intro_text = ?, intro_audio_key = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(intro_text)
        .bind(intro_audio_key)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Failed -> Pending, optionally swapping in a new source.
    ///
    /// Derived artifacts are cleared so the pipeline starts from scratch. A
    /// replacement whose hash matches another live item is refused without
    /// touching the row.
    #[tracing::instrument(skip(self, replacement), fields(db.table = "media_items", db.operation = "retry", db.record_id = %id))]
    pub async fn reset_for_retry(
        &self,
        id: Uuid,
        replacement: Option<&SourceReplacement>,
    ) -> Result<RetryReset, AppError> {
        retry_write("reset_for_retry", move || async move {
            let mut tx = ImmediateTransaction::begin(&self.pool).await?;
            let result = Self::reset_in_tx(&mut tx, id, replacement).await;
            tx.finish(result).await
        })
        .await
    }

    async fn reset_in_tx(
        conn: &mut SqliteConnection,
        id: Uuid,
        replacement: Option<&SourceReplacement>,
    ) -> Result<RetryReset, AppError> {
        let current = fetch_item(conn, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Media item {} not found", id)))?;
        current.status.transition(MediaStatus::Pending)?;

        if let Some(replacement) = replacement {
            let draft = &replacement.draft;
            if draft.kind != current.kind {
                return Err(AppError::TypeMismatch {
                    declared: current.kind,
                    detected: draft.kind,
                });
            }
            if let Some(existing) = fetch_live_by_hash(conn, &draft.content_hash).await? {
                if existing.id != id {
                    return Ok(RetryReset::Duplicate(existing));
                }
            }

            sqlx::query(
                "UPDATE media_items SET content_hash = ?, original_filename = ?, mime_type = ?, \
                 size_bytes = ?, original_key = ? WHERE id = ?",
            )
            .bind(&draft.content_hash)
            .bind(&draft.original_filename)
            .bind(draft.mime_type())
            .bind(draft.size_bytes)
            .bind(&replacement.original_key)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        }

        sqlx::query(
            "UPDATE media_items SET transcoded_key = NULL, thumbnail_key = NULL, \
             intro_text = NULL, intro_audio_key = NULL, duration_secs = NULL WHERE id = ?",
        )
        .bind(id)
        .execute(&mut *conn)
        .await?;

        let note = if replacement.is_some() {
            "manual retry with replacement source"
        } else {
            "manual retry"
        };
        let item = apply_transition(conn, id, MediaStatus::Pending, Some(note)).await?;
        Ok(RetryReset::Reset(item))
    }

    /// Return a reset item that never got its transcode job back to Failed.
    ///
    /// Failed is only reachable from a pipeline stage, so the item passes
    /// through Validating in the same transaction.
    #[tracing::instrument(skip(self), fields(db.table = "media_items", db.operation = "update", db.record_id = %id))]
    pub async fn abandon_retry(&self, id: Uuid, error: &str) -> Result<MediaItem, AppError> {
        retry_write("abandon_retry", move || async move {
            let mut tx = ImmediateTransaction::begin(&self.pool).await?;
            let result = async {
                apply_transition(&mut tx, id, MediaStatus::Validating, Some("retry not queued")).await?;
                apply_transition(&mut tx, id, MediaStatus::Failed, Some(error)).await
            }
            .await;
            tx.finish(result).await
        })
        .await
    }

    /// Every transition the item went through, oldest first.
    #[tracing::instrument(skip(self), fields(db.table = "media_transitions", db.operation = "select", db.record_id = %id))]
    pub async fn history(&self, id: Uuid) -> Result<Vec<MediaTransition>, AppError> {
        let transitions = sqlx::query_as::<_, MediaTransition>(
            "SELECT media_id, from_status, to_status, note, at FROM media_transitions \
             WHERE media_id = ? ORDER BY id ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(transitions)
    }

    #[tracing::instrument(skip(self), fields(db.table = "media_items", db.operation = "select"))]
    pub async fn list_by_status(
        &self,
        status: MediaStatus,
        limit: i64,
    ) -> Result<Vec<MediaItem>, AppError> {
        let items = sqlx::query_as::<_, MediaItem>(
            "SELECT * FROM media_items WHERE status = ? ORDER BY created_at ASC LIMIT ?",
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Approved items of `kind`, least played first.
    #[tracing::instrument(skip(self), fields(db.table = "media_items", db.operation = "select"))]
    pub async fn list_playable(&self, kind: MediaKind) -> Result<Vec<MediaItem>, AppError> {
        let items = sqlx::query_as::<_, MediaItem>(
            "SELECT * FROM media_items WHERE status = 'approved' AND kind = ? \
             ORDER BY played_count ASC, created_at DESC",
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Approved items created before `cutoff` that were never played and are on no playlist.
    #[tracing::instrument(skip(self), fields(db.table = "media_items", db.operation = "select"))]
    pub async fn archive_candidates(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<MediaItem>, AppError> {
        let items = sqlx::query_as::<_, MediaItem>(&format!(
            "SELECT * FROM media_items WHERE {} ORDER BY created_at ASC LIMIT ?",
            ARCHIVE_GUARD
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Archive `id` if it still satisfies the retention guard.
    ///
    /// The guard is re-evaluated under the write lock, so an item appended to a
    /// playlist after it was selected as a candidate is left alone. Returns the
    /// item as it was before archiving (its artifact keys are what the caller
    /// must delete), or `None` when the guard no longer holds.
    #[tracing::instrument(skip(self), fields(db.table = "media_items", db.operation = "archive", db.record_id = %id))]
    pub async fn archive_if_unreferenced(
        &self,
        id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<MediaItem>, AppError> {
        retry_write("archive_if_unreferenced", move || async move {
            let mut tx = ImmediateTransaction::begin(&self.pool).await?;
            let result = Self::archive_in_tx(&mut tx, id, cutoff).await;
            tx.finish(result).await
        })
        .await
    }

    async fn archive_in_tx(
        conn: &mut SqliteConnection,
        id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<MediaItem>, AppError> {
        let candidate = sqlx::query_as::<_, MediaItem>(&format!(
            "SELECT * FROM media_items WHERE id = ? AND {}",
            ARCHIVE_GUARD
        ))
        .bind(id)
        .bind(cutoff)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(before) = candidate else {
            return Ok(None);
        };

        apply_transition(conn, id, MediaStatus::Archived, Some("retention sweep")).await?;
        sqlx::query(
            "UPDATE media_items SET original_key = NULL, transcoded_key = NULL, \
             thumbnail_key = NULL, intro_audio_key = NULL WHERE id = ?",
        )
        .bind(id)
        .execute(&mut *conn)
        .await?;

        Ok(Some(before))
    }

    /// Testing and backfill hook: override an item's creation time.
    pub async fn set_created_at(&self, id: Uuid, created_at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE media_items SET created_at = ? WHERE id = ?")
            .bind(created_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
