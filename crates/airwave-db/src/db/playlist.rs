//! Playlist queues.
//!
//! Positions in a playlist are always exactly `0..N-1`. Every mutation runs in
//! one `BEGIN IMMEDIATE` transaction, and shifts go through negative positions
//! so `UNIQUE (playlist_id, position)` holds row by row during the update.

use airwave_core::models::{positions_are_contiguous, MediaStatus, Playlist, PlaylistEntry};
use airwave_core::AppError;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::media::{fetch_item, record_play};
use super::transaction::{is_unique_violation, retry_write, ImmediateTransaction};

#[derive(Clone)]
pub struct PlaylistRepository {
    pool: SqlitePool,
}

fn position_conflict(err: sqlx::Error, playlist_id: Uuid) -> AppError {
    if is_unique_violation(&err) {
        AppError::QueueConflict(format!("position taken in playlist {}", playlist_id))
    } else {
        err.into()
    }
}

async fn require_playlist(conn: &mut SqliteConnection, playlist_id: Uuid) -> Result<(), AppError> {
    let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM playlists WHERE id = ?")
        .bind(playlist_id)
        .fetch_optional(&mut *conn)
        .await?;
    match exists {
        Some(_) => Ok(()),
        None => Err(AppError::NotFound(format!(
            "Playlist {} not found",
            playlist_id
        ))),
    }
}

/// Only Approved items may be queued; checked under the write lock.
async fn require_playable(conn: &mut SqliteConnection, media_id: Uuid) -> Result<(), AppError> {
    let item = fetch_item(conn, media_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Media item {} not found", media_id)))?;
    if item.status != MediaStatus::Approved {
        return Err(AppError::NotEligible(format!(
            "Media item {} is {}, only approved items can be queued",
            media_id, item.status
        )));
    }
    Ok(())
}

async fn entry_count(conn: &mut SqliteConnection, playlist_id: Uuid) -> Result<i64, AppError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM playlist_entries WHERE playlist_id = ?")
        .bind(playlist_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

async fn insert_entry(
    conn: &mut SqliteConnection,
    playlist_id: Uuid,
    media_id: Uuid,
    position: i64,
) -> Result<PlaylistEntry, AppError> {
    sqlx::query_as::<_, PlaylistEntry>(
        "INSERT INTO playlist_entries (id, playlist_id, media_id, position, created_at) \
         VALUES (?, ?, ?, ?, ?) RETURNING id, playlist_id, media_id, position, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(playlist_id)
    .bind(media_id)
    .bind(position)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| position_conflict(e, playlist_id))
}

/// Shift every entry at `position` or later up by one.
async fn open_gap(
    conn: &mut SqliteConnection,
    playlist_id: Uuid,
    position: i64,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE playlist_entries SET position = -position - 1 \
         WHERE playlist_id = ? AND position >= ?",
    )
    .bind(playlist_id)
    .bind(position)
    .execute(&mut *conn)
    .await
    .map_err(|e| position_conflict(e, playlist_id))?;

    sqlx::query("UPDATE playlist_entries SET position = -position WHERE playlist_id = ? AND position < 0")
        .bind(playlist_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| position_conflict(e, playlist_id))?;
    Ok(())
}

/// Shift every entry after `removed` down by one.
async fn close_gap(
    conn: &mut SqliteConnection,
    playlist_id: Uuid,
    removed: i64,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE playlist_entries SET position = -position \
         WHERE playlist_id = ? AND position > ?",
    )
    .bind(playlist_id)
    .bind(removed)
    .execute(&mut *conn)
    .await
    .map_err(|e| position_conflict(e, playlist_id))?;

    sqlx::query(
        "UPDATE playlist_entries SET position = -position - 1 \
         WHERE playlist_id = ? AND position < 0",
    )
    .bind(playlist_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| position_conflict(e, playlist_id))?;
    Ok(())
}

async fn entry_at(
    conn: &mut SqliteConnection,
    playlist_id: Uuid,
    position: i64,
) -> Result<Option<PlaylistEntry>, AppError> {
    let entry = sqlx::query_as::<_, PlaylistEntry>(
        "SELECT id, playlist_id, media_id, position, created_at FROM playlist_entries \
         WHERE playlist_id = ? AND position = ?",
    )
    .bind(playlist_id)
    .bind(position)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(entry)
}

async fn delete_entry(
    conn: &mut SqliteConnection,
    entry: &PlaylistEntry,
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM playlist_entries WHERE id = ?")
        .bind(entry.id)
        .execute(&mut *conn)
        .await?;
    close_gap(conn, entry.playlist_id, entry.position).await
}

impl PlaylistRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip(self), fields(db.table = "playlists", db.operation = "insert"))]
    pub async fn create(&self, name: &str, description: Option<&str>) -> Result<Playlist, AppError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidInput("Playlist name cannot be empty".to_string()));
        }

        let created = sqlx::query_as::<_, Playlist>(
            "INSERT INTO playlists (id, name, description, created_at) VALUES (?, ?, ?, ?) \
             RETURNING id, name, description, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(description)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await;

        match created {
            Ok(playlist) => Ok(playlist),
            Err(err) if is_unique_violation(&err) => Err(AppError::InvalidInput(format!(
                "Playlist '{}' already exists",
                name
            ))),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Playlist>, AppError> {
        let playlist = sqlx::query_as::<_, Playlist>(
            "SELECT id, name, description, created_at FROM playlists WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(playlist)
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<Playlist>, AppError> {
        let playlist = sqlx::query_as::<_, Playlist>(
            "SELECT id, name, description, created_at FROM playlists WHERE name = ?",
        )
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(playlist)
    }

    /// Look a playlist up by name, creating it on first use.
    #[tracing::instrument(skip(self), fields(db.table = "playlists", db.operation = "upsert"))]
    pub async fn get_or_create(&self, name: &str) -> Result<Playlist, AppError> {
        if let Some(playlist) = self.get_by_name(name).await? {
            return Ok(playlist);
        }
        match self.create(name, None).await {
            Ok(playlist) => Ok(playlist),
            // Lost a creation race; the winner's row is there now.
            Err(AppError::InvalidInput(_)) => self
                .get_by_name(name)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Playlist '{}' not found", name))),
            Err(err) => Err(err),
        }
    }

    pub async fn list(&self) -> Result<Vec<Playlist>, AppError> {
        let playlists = sqlx::query_as::<_, Playlist>(
            "SELECT id, name, description, created_at FROM playlists ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(playlists)
    }

    /// Entries in position order.
    pub async fn entries(&self, playlist_id: Uuid) -> Result<Vec<PlaylistEntry>, AppError> {
        let entries = sqlx::query_as::<_, PlaylistEntry>(
            "SELECT id, playlist_id, media_id, position, created_at FROM playlist_entries \
             WHERE playlist_id = ? ORDER BY position ASC",
        )
        .bind(playlist_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    pub async fn len(&self, playlist_id: Uuid) -> Result<i64, AppError> {
        let mut conn = self.pool.acquire().await?;
        entry_count(&mut conn, playlist_id).await
    }

    /// Check that positions are exactly `0..N-1`.
    pub async fn verify_contiguous(&self, playlist_id: Uuid) -> Result<bool, AppError> {
        let positions: Vec<i64> =
            sqlx::query_scalar("SELECT position FROM playlist_entries WHERE playlist_id = ?")
                .bind(playlist_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(positions_are_contiguous(&positions))
    }

    /// Add an Approved item at the end of the playlist.
    #[tracing::instrument(skip(self), fields(db.table = "playlist_entries", db.operation = "append"))]
    pub async fn append(&self, playlist_id: Uuid, media_id: Uuid) -> Result<PlaylistEntry, AppError> {
        retry_write("playlist_append", move || async move {
            let mut tx = ImmediateTransaction::begin(&self.pool).await?;
            let result = Self::append_in_tx(&mut tx, playlist_id, media_id).await;
            tx.finish(result).await
        })
        .await
    }

    async fn append_in_tx(
        conn: &mut SqliteConnection,
        playlist_id: Uuid,
        media_id: Uuid,
    ) -> Result<PlaylistEntry, AppError> {
        require_playlist(conn, playlist_id).await?;
        require_playable(conn, media_id).await?;

        let next: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM playlist_entries WHERE playlist_id = ?",
        )
        .bind(playlist_id)
        .fetch_one(&mut *conn)
        .await?;

        let entry = insert_entry(conn, playlist_id, media_id, next).await?;
        tracing::debug!(
            playlist_id = %playlist_id,
            media_id = %media_id,
            position = entry.position,
            "Appended to playlist"
        );
        Ok(entry)
    }

    /// Insert an Approved item at `position` (0..=len), shifting later entries up.
    #[tracing::instrument(skip(self), fields(db.table = "playlist_entries", db.operation = "insert"))]
    pub async fn insert_at(
        &self,
        playlist_id: Uuid,
        position: i64,
        media_id: Uuid,
    ) -> Result<PlaylistEntry, AppError> {
        retry_write("playlist_insert_at", move || async move {
            let mut tx = ImmediateTransaction::begin(&self.pool).await?;
            let result = Self::insert_in_tx(&mut tx, playlist_id, position, media_id).await;
            tx.finish(result).await
        })
        .await
    }

    async fn insert_in_tx(
        conn: &mut SqliteConnection,
        playlist_id: Uuid,
        position: i64,
        media_id: Uuid,
    ) -> Result<PlaylistEntry, AppError> {
        require_playlist(conn, playlist_id).await?;
        require_playable(conn, media_id).await?;

        let len = entry_count(conn, playlist_id).await?;
        if position < 0 || position > len {
            return Err(AppError::InvalidInput(format!(
                "Position {} is out of range 0..={}",
                position, len
            )));
        }

        open_gap(conn, playlist_id, position).await?;
        let entry = insert_entry(conn, playlist_id, media_id, position).await?;
        tracing::debug!(
            playlist_id = %playlist_id,
            media_id = %media_id,
            position,
            "Inserted into playlist"
        );
        Ok(entry)
    }

    /// Delete an entry and close the gap it leaves.
    #[tracing::instrument(skip(self), fields(db.table = "playlist_entries", db.operation = "delete"))]
    pub async fn remove(&self, playlist_id: Uuid, entry_id: Uuid) -> Result<PlaylistEntry, AppError> {
        retry_write("playlist_remove", move || async move {
            let mut tx = ImmediateTransaction::begin(&self.pool).await?;
            let result = Self::remove_in_tx(&mut tx, playlist_id, entry_id).await;
            tx.finish(result).await
        })
        .await
    }

    async fn remove_in_tx(
        conn: &mut SqliteConnection,
        playlist_id: Uuid,
        entry_id: Uuid,
    ) -> Result<PlaylistEntry, AppError> {
        let entry = sqlx::query_as::<_, PlaylistEntry>(
            "SELECT id, playlist_id, media_id, position, created_at FROM playlist_entries \
             WHERE id = ? AND playlist_id = ?",
        )
        .bind(entry_id)
        .bind(playlist_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "Entry {} not found in playlist {}",
                entry_id, playlist_id
            ))
        })?;

        delete_entry(conn, &entry).await?;
        Ok(entry)
    }

    /// The entry at position 0, if any. Does not modify the playlist.
    pub async fn peek_next(&self, playlist_id: Uuid) -> Result<Option<PlaylistEntry>, AppError> {
        let mut conn = self.pool.acquire().await?;
        entry_at(&mut conn, playlist_id, 0).await
    }

    /// Consume position 0: remove it, renumber the rest and record the play.
    #[tracing::instrument(skip(self), fields(db.table = "playlist_entries", db.operation = "advance"))]
    pub async fn advance(&self, playlist_id: Uuid) -> Result<Option<PlaylistEntry>, AppError> {
        retry_write("playlist_advance", move || async move {
            let mut tx = ImmediateTransaction::begin(&self.pool).await?;
            let result = Self::advance_in_tx(&mut tx, playlist_id).await;
            tx.finish(result).await
        })
        .await
    }

    async fn advance_in_tx(
        conn: &mut SqliteConnection,
        playlist_id: Uuid,
    ) -> Result<Option<PlaylistEntry>, AppError> {
        let Some(head) = entry_at(conn, playlist_id, 0).await? else {
            return Ok(None);
        };
        delete_entry(conn, &head).await?;
        record_play(conn, head.media_id, Utc::now()).await?;
        Ok(Some(head))
    }

    /// Create the named playlist if needed and replace its contents with
    /// `media_ids` at positions `0..N-1`, in one transaction.
    #[tracing::instrument(skip(self, media_ids), fields(db.table = "playlist_entries", db.operation = "replace", count = media_ids.len()))]
    pub async fn replace_entries(
        &self,
        name: &str,
        description: Option<&str>,
        media_ids: &[Uuid],
    ) -> Result<(Playlist, Vec<PlaylistEntry>), AppError> {
        let playlist = match self.get_by_name(name).await? {
            Some(playlist) => playlist,
            None => match self.create(name, description).await {
                Ok(playlist) => playlist,
                Err(AppError::InvalidInput(_)) => self.get_or_create(name).await?,
                Err(err) => return Err(err),
            },
        };
        let playlist_id = playlist.id;

        let entries = retry_write("playlist_replace", move || async move {
            let mut tx = ImmediateTransaction::begin(&self.pool).await?;
            let result = Self::replace_in_tx(&mut tx, playlist_id, media_ids).await;
            tx.finish(result).await
        })
        .await?;

        Ok((playlist, entries))
    }

    async fn replace_in_tx(
        conn: &mut SqliteConnection,
        playlist_id: Uuid,
        media_ids: &[Uuid],
    ) -> Result<Vec<PlaylistEntry>, AppError> {
        sqlx::query("DELETE FROM playlist_entries WHERE playlist_id = ?")
            .bind(playlist_id)
            .execute(&mut *conn)
            .await?;

        let mut entries = Vec::with_capacity(media_ids.len());
        for (position, media_id) in media_ids.iter().enumerate() {
            require_playable(conn, *media_id).await?;
            entries.push(insert_entry(conn, playlist_id, *media_id, position as i64).await?);
        }
        Ok(entries)
    }

    /// Delete playlists created before `cutoff`, except the one named `keep`.
    #[tracing::instrument(skip(self), fields(db.table = "playlists", db.operation = "delete"))]
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>, keep: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM playlists WHERE created_at < ? AND name <> ?")
            .bind(cutoff)
            .bind(keep)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Testing and backfill hook: override a playlist's creation time.
    pub async fn set_created_at(&self, id: Uuid, created_at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE playlists SET created_at = ? WHERE id = ?")
            .bind(created_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::media::tests::{approved_item, draft};
    use crate::db::pool::{connect, connect_in_memory, run_migrations};
    use crate::db::MediaRepository;
    use airwave_core::models::MediaKind;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::time::Duration;

    async fn setup(approved: usize) -> (PlaylistRepository, MediaRepository, Playlist, Vec<Uuid>) {
        let pool = connect_in_memory().await.unwrap();
        let media = MediaRepository::new(pool.clone());
        let mut ids = Vec::new();
        for n in 0..approved {
            ids.push(approved_item(&media, &format!("p{}", n), MediaKind::Audio).await.id);
        }
        let playlists = PlaylistRepository::new(pool);
        let current = playlists.get_or_create("current").await.unwrap();
        (playlists, media, current, ids)
    }

    async fn media_order(playlists: &PlaylistRepository, playlist_id: Uuid) -> Vec<Uuid> {
        playlists
            .entries(playlist_id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.media_id)
            .collect()
    }

    #[tokio::test]
    async fn test_append_assigns_next_position() {
        let (playlists, _, current, ids) = setup(3).await;

        for (expected, id) in ids.iter().enumerate() {
            let entry = playlists.append(current.id, *id).await.unwrap();
            assert_eq!(entry.position, expected as i64);
        }
        assert_eq!(media_order(&playlists, current.id).await, ids);
        assert!(playlists.verify_contiguous(current.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_append_rejects_unapproved() {
        let (playlists, media, current, _) = setup(0).await;
        let pending = media
            .lookup_or_reserve(&draft("pending", MediaKind::Audio))
            .await
            .unwrap()
            .item()
            .clone();

        let err = playlists.append(current.id, pending.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotEligible(_)));
        let err = playlists.append(current.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(playlists.len(current.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_at_shifts_later_entries() {
        let (playlists, _, current, ids) = setup(4).await;
        for id in &ids[..3] {
            playlists.append(current.id, *id).await.unwrap();
        }

        let entry = playlists.insert_at(current.id, 1, ids[3]).await.unwrap();
        assert_eq!(entry.position, 1);
        assert_eq!(
            media_order(&playlists, current.id).await,
            vec![ids[0], ids[3], ids[1], ids[2]]
        );

        // Inserting at len is an append; beyond len is rejected.
        let err = playlists.insert_at(current.id, 9, ids[0]).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        let tail = playlists.insert_at(current.id, 4, ids[0]).await.unwrap();
        assert_eq!(tail.position, 4);
        assert!(playlists.verify_contiguous(current.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_compacts_positions() {
        let (playlists, _, current, ids) = setup(4).await;
        let mut entries = Vec::new();
        for id in &ids {
            entries.push(playlists.append(current.id, *id).await.unwrap());
        }

        let removed = playlists.remove(current.id, entries[1].id).await.unwrap();
        assert_eq!(removed.position, 1);
        let positions: Vec<i64> = playlists
            .entries(current.id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.position)
            .collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert_eq!(
            media_order(&playlists, current.id).await,
            vec![ids[0], ids[2], ids[3]]
        );

        let err = playlists.remove(current.id, entries[1].id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_peek_and_advance_consume_head() {
        let (playlists, media, current, ids) = setup(2).await;
        assert!(playlists.peek_next(current.id).await.unwrap().is_none());
        assert!(playlists.advance(current.id).await.unwrap().is_none());

        playlists.append(current.id, ids[0]).await.unwrap();
        playlists.append(current.id, ids[1]).await.unwrap();

        let head = playlists.peek_next(current.id).await.unwrap().unwrap();
        assert_eq!(head.media_id, ids[0]);
        assert_eq!(playlists.len(current.id).await.unwrap(), 2);

        let consumed = playlists.advance(current.id).await.unwrap().unwrap();
        assert_eq!(consumed.media_id, ids[0]);
        let next = playlists.peek_next(current.id).await.unwrap().unwrap();
        assert_eq!(next.media_id, ids[1]);
        assert_eq!(next.position, 0);

        let played = media.get_required(ids[0]).await.unwrap();
        assert_eq!(played.played_count, 1);
        assert!(played.last_played_at.is_some());
    }

    #[tokio::test]
    async fn test_random_mutations_keep_positions_contiguous() {
        let (playlists, _, current, ids) = setup(5).await;
        let mut rng = StdRng::seed_from_u64(17);

        for _ in 0..120 {
            let len = playlists.len(current.id).await.unwrap();
            let media_id = ids[rng.random_range(0..ids.len())];
            match rng.random_range(0..4) {
                0 => {
                    playlists.append(current.id, media_id).await.unwrap();
                }
                1 => {
                    let position = rng.random_range(0..=len);
                    playlists.insert_at(current.id, position, media_id).await.unwrap();
                }
                2 if len > 0 => {
                    let entries = playlists.entries(current.id).await.unwrap();
                    let victim = &entries[rng.random_range(0..entries.len())];
                    playlists.remove(current.id, victim.id).await.unwrap();
                }
                _ => {
                    playlists.advance(current.id).await.unwrap();
                }
            }
            assert!(playlists.verify_contiguous(current.id).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_concurrent_appends_stay_contiguous() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("queue.db").display());
        let pool = connect(&url, 8, Duration::from_secs(5)).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let media = MediaRepository::new(pool.clone());
        let item = approved_item(&media, "shared", MediaKind::Audio).await;
        let playlists = PlaylistRepository::new(pool);
        let current = playlists.get_or_create("current").await.unwrap();

        let writers = (0..8).map(|n| {
            let playlists = playlists.clone();
            let playlist_id = current.id;
            tokio::spawn(async move {
                for i in 0..5 {
                    if (n + i) % 3 == 0 {
                        playlists.insert_at(playlist_id, 0, item.id).await.unwrap();
                    } else {
                        playlists.append(playlist_id, item.id).await.unwrap();
                    }
                }
            })
        });
        for writer in futures::future::join_all(writers).await {
            writer.unwrap();
        }

        assert_eq!(playlists.len(current.id).await.unwrap(), 40);
        assert!(playlists.verify_contiguous(current.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_entries_and_cleanup() {
        let (playlists, _, current, ids) = setup(3).await;
        let (daily, entries) = playlists
            .replace_entries("daily-2024-06-01", Some("Daily mix"), &ids)
            .await
            .unwrap();
        assert_eq!(entries.len(), 3);
        assert!(playlists.verify_contiguous(daily.id).await.unwrap());

        let (again, entries) = playlists
            .replace_entries("daily-2024-06-01", None, &ids[..1])
            .await
            .unwrap();
        assert_eq!(again.id, daily.id);
        assert_eq!(entries.len(), 1);
        assert_eq!(playlists.len(daily.id).await.unwrap(), 1);

        playlists
            .set_created_at(daily.id, Utc::now() - chrono::Duration::days(10))
            .await
            .unwrap();
        playlists
            .set_created_at(current.id, Utc::now() - chrono::Duration::days(10))
            .await
            .unwrap();
        let removed = playlists
            .delete_older_than(Utc::now() - chrono::Duration::days(7), "current")
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(playlists.get(daily.id).await.unwrap().is_none());
        assert!(playlists.get(current.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_names() {
        let (playlists, _, _, _) = setup(0).await;
        let err = playlists.create("current", None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(matches!(
            playlists.create("  ", None).await,
            Err(AppError::InvalidInput(_))
        ));
    }
}
