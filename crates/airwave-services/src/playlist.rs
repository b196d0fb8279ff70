//! Playlist scheduling: named queues, daily generation and M3U export.

use bytes::Bytes;
use chrono::{Local, NaiveDate, Timelike};
use rand::seq::{IndexedRandom, SliceRandom};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use airwave_core::models::{MediaItem, MediaKind, Playlist, PlaylistEntry};
use airwave_core::AppError;
use airwave_db::{MediaRepository, PlaylistRepository};
use airwave_processing::{compose_transition, DjTransition, NarrationClient, Personality, TransitionRequest};
use airwave_storage::{keys, Storage};

/// A playlist entry with the media item it points at.
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    #[serde(flatten)]
    pub entry: PlaylistEntry,
    pub media: Option<MediaItem>,
}

#[derive(Clone)]
pub struct PlaylistService {
    playlists: PlaylistRepository,
    media: MediaRepository,
    storage: Arc<dyn Storage>,
    narration: Arc<dyn NarrationClient>,
    daily_slots: usize,
    audio_share: f64,
}

pub fn daily_playlist_name(date: NaiveDate) -> String {
    format!("daily-{}", date.format("%Y-%m-%d"))
}

/// Pick `slots` items: `floor(slots * audio_share)` audio, the rest video, in
/// random order. A kind with too few items contributes what it has.
fn pick_daily(audio: &[MediaItem], video: &[MediaItem], slots: usize, audio_share: f64) -> Vec<Uuid> {
    let audio_slots = ((slots as f64) * audio_share).floor() as usize;
    let video_slots = slots.saturating_sub(audio_slots);

    let mut rng = rand::rng();
    let mut picked: Vec<Uuid> = audio
        .choose_multiple(&mut rng, audio_slots)
        .chain(video.choose_multiple(&mut rng, video_slots))
        .map(|item| item.id)
        .collect();
    picked.shuffle(&mut rng);
    picked
}

impl PlaylistService {
    pub fn new(
        playlists: PlaylistRepository,
        media: MediaRepository,
        storage: Arc<dyn Storage>,
        narration: Arc<dyn NarrationClient>,
        daily_slots: usize,
        audio_share: f64,
    ) -> Self {
        Self {
            playlists,
            media,
            storage,
            narration,
            daily_slots,
            audio_share,
        }
    }

    async fn require(&self, name: &str) -> Result<Playlist, AppError> {
        self.playlists
            .get_by_name(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Playlist '{}' not found", name)))
    }

    async fn with_media(&self, entry: PlaylistEntry) -> Result<QueueItem, AppError> {
        let media = self.media.get(entry.media_id).await?;
        Ok(QueueItem { entry, media })
    }

    pub async fn list(&self) -> Result<Vec<Playlist>, AppError> {
        self.playlists.list().await
    }

    /// Entries of `name` in play order.
    pub async fn show(&self, name: &str) -> Result<Vec<QueueItem>, AppError> {
        let playlist = self.require(name).await?;
        let mut items = Vec::new();
        for entry in self.playlists.entries(playlist.id).await? {
            items.push(self.with_media(entry).await?);
        }
        Ok(items)
    }

    /// Append to `name`, creating the playlist on first use.
    pub async fn append(&self, name: &str, media_id: Uuid) -> Result<PlaylistEntry, AppError> {
        let playlist = self.playlists.get_or_create(name).await?;
        self.playlists.append(playlist.id, media_id).await
    }

    pub async fn insert(&self, name: &str, position: i64, media_id: Uuid) -> Result<PlaylistEntry, AppError> {
        let playlist = self.playlists.get_or_create(name).await?;
        self.playlists.insert_at(playlist.id, position, media_id).await
    }

    pub async fn remove(&self, name: &str, entry_id: Uuid) -> Result<PlaylistEntry, AppError> {
        let playlist = self.require(name).await?;
        self.playlists.remove(playlist.id, entry_id).await
    }

    pub async fn peek_next(&self, name: &str) -> Result<Option<QueueItem>, AppError> {
        let playlist = self.require(name).await?;
        match self.playlists.peek_next(playlist.id).await? {
            Some(entry) => Ok(Some(self.with_media(entry).await?)),
            None => Ok(None),
        }
    }

    /// Pop the head of `name` and record the play.
    pub async fn advance(&self, name: &str) -> Result<Option<QueueItem>, AppError> {
        let playlist = self.require(name).await?;
        match self.playlists.advance(playlist.id).await? {
            Some(entry) => {
                let item = self.with_media(entry).await?;
                tracing::info!(
                    playlist = %playlist.name,
                    media_id = %item.entry.media_id,
                    "Playlist advanced"
                );
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    /// Host patter between the head of `name` and the entry after it.
    ///
    /// Returns `None` when fewer than two entries are queued. Generation
    /// failures fall back to a canned line, so this only fails on lookups.
    #[tracing::instrument(skip(self))]
    pub async fn transition(&self, name: &str) -> Result<Option<DjTransition>, AppError> {
        let playlist = self.require(name).await?;
        let entries = self.playlists.entries(playlist.id).await?;
        let [current, next, ..] = entries.as_slice() else {
            return Ok(None);
        };
        let (Some(current), Some(next)) = (
            self.media.get(current.media_id).await?,
            self.media.get(next.media_id).await?,
        ) else {
            return Ok(None);
        };

        let request = TransitionRequest {
            previous_title: current.title,
            next_title: next.title,
            next_creator: next.uploader,
        };
        let personality = Personality::for_hour(Local::now().hour(), &mut rand::rng());
        let transition = compose_transition(self.narration.as_ref(), &request, personality).await;
        tracing::info!(
            playlist = %playlist.name,
            personality = %transition.personality,
            used_fallback = transition.used_fallback,
            "Transition composed"
        );
        Ok(Some(transition))
    }

    /// Build (or rebuild) the `daily-YYYY-MM-DD` playlist from approved content.
    #[tracing::instrument(skip(self), fields(date = %date))]
    pub async fn generate_daily(&self, date: NaiveDate) -> Result<(Playlist, Vec<PlaylistEntry>), AppError> {
        let audio = self.media.list_playable(MediaKind::Audio).await?;
        let video = self.media.list_playable(MediaKind::Video).await?;
        if audio.is_empty() && video.is_empty() {
            return Err(AppError::NotEligible(
                "No approved content to schedule".to_string(),
            ));
        }

        let picked = pick_daily(&audio, &video, self.daily_slots, self.audio_share);
        let name = daily_playlist_name(date);
        let description = format!("Generated schedule for {}", date);
        let (playlist, entries) = self
            .playlists
            .replace_entries(&name, Some(&description), &picked)
            .await?;

        tracing::info!(
            playlist = %playlist.name,
            entries = entries.len(),
            available_audio = audio.len(),
            available_video = video.len(),
            "Daily playlist generated"
        );
        Ok((playlist, entries))
    }

    /// Write `name` as an extended M3U playlist and return its storage key.
    ///
    /// Each item is preceded by its intro when one is stored. Entries whose
    /// artifact is missing are skipped.
    #[tracing::instrument(skip(self))]
    pub async fn export_m3u(&self, name: &str) -> Result<String, AppError> {
        let playlist = self.require(name).await?;
        let entries = self.playlists.entries(playlist.id).await?;

        let mut lines = vec!["#EXTM3U".to_string()];
        let mut written = 0usize;
        for entry in entries {
            let Some(item) = self.media.get(entry.media_id).await? else {
                continue;
            };

            if let Some(intro) = item.intro_audio_key.as_deref() {
                if self.storage.exists(intro).await? {
                    let path = self.storage.resolve(intro)?;
                    lines.push(format!("#EXTINF:-1,DJ Intro - {}", item.title));
                    lines.push(path.display().to_string());
                }
            }

            let Some(key) = item.playable_key() else {
                continue;
            };
            if !self.storage.exists(key).await? {
                tracing::warn!(media_id = %item.id, key = %key, "Playable artifact missing, skipped in export");
                continue;
            }
            let path = self.storage.resolve(key)?;
            let duration = item.duration_secs.map(|d| d.round() as i64).unwrap_or(-1);
            lines.push(match item.uploader.as_deref() {
                Some(uploader) => format!("#EXTINF:{},{} - {}", duration, item.title, uploader),
                None => format!("#EXTINF:{},{}", duration, item.title),
            });
            lines.push(path.display().to_string());
            written += 1;
        }

        let mut m3u = lines.join("\n");
        m3u.push('\n');

        let key = keys::playlist_export_key(&playlist.name);
        self.storage.put(&key, Bytes::from(m3u)).await?;
        tracing::info!(playlist = %playlist.name, key = %key, entries = written, "Playlist exported");
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, fixture_with, ingest_processed, mp4_bytes, wav_bytes, FakeNarration};
    use airwave_core::models::MediaStatus;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_append_creates_named_playlist() {
        let fixture = fixture().await;
        let state = &fixture.state;
        let id = ingest_processed(state, wav_bytes(1), "a.wav", MediaKind::Audio, "Song A").await;

        let scheduler = state.scheduler();
        let entry = scheduler.append("current", id).await.unwrap();
        assert_eq!(entry.position, 0);

        let items = scheduler.show("current").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].media.as_ref().unwrap().title, "Song A");
    }

    #[tokio::test]
    async fn test_unapproved_item_is_refused() {
        let fixture = fixture().await;
        let state = &fixture.state;
        let receipt = state
            .ingest()
            .ingest(
                std::io::Cursor::new(wav_bytes(2)),
                "p.wav",
                MediaKind::Audio,
                crate::UploadMetadata {
                    title: "Pending".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let result = state.scheduler().append("current", receipt.media_id).await;
        assert!(matches!(result, Err(AppError::NotEligible(_))));
    }

    #[tokio::test]
    async fn test_insert_remove_keep_positions_contiguous() {
        let fixture = fixture().await;
        let state = &fixture.state;
        let a = ingest_processed(state, wav_bytes(1), "a.wav", MediaKind::Audio, "A").await;
        let b = ingest_processed(state, wav_bytes(2), "b.wav", MediaKind::Audio, "B").await;
        let c = ingest_processed(state, wav_bytes(3), "c.wav", MediaKind::Audio, "C").await;

        let scheduler = state.scheduler();
        scheduler.append("q", a).await.unwrap();
        scheduler.append("q", c).await.unwrap();
        scheduler.insert("q", 1, b).await.unwrap();

        let order: Vec<Uuid> = scheduler.show("q").await.unwrap().iter().map(|i| i.entry.media_id).collect();
        assert_eq!(order, vec![a, b, c]);

        let head = scheduler.show("q").await.unwrap()[0].entry.id;
        scheduler.remove("q", head).await.unwrap();
        let items = scheduler.show("q").await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].entry.position, 0);
        assert_eq!(items[1].entry.position, 1);

        let out_of_range = scheduler.insert("q", 5, a).await;
        assert!(matches!(out_of_range, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_advance_records_play() {
        let fixture = fixture().await;
        let state = &fixture.state;
        let a = ingest_processed(state, wav_bytes(1), "a.wav", MediaKind::Audio, "A").await;
        let b = ingest_processed(state, wav_bytes(2), "b.wav", MediaKind::Audio, "B").await;

        let scheduler = state.scheduler();
        scheduler.append("q", a).await.unwrap();
        scheduler.append("q", b).await.unwrap();

        assert_eq!(scheduler.peek_next("q").await.unwrap().unwrap().entry.media_id, a);
        let played = scheduler.advance("q").await.unwrap().unwrap();
        assert_eq!(played.entry.media_id, a);

        let next = scheduler.peek_next("q").await.unwrap().unwrap();
        assert_eq!(next.entry.media_id, b);
        assert_eq!(next.entry.position, 0);

        let item = state.media.get_required(a).await.unwrap();
        assert_eq!(item.played_count, 1);
        assert!(item.last_played_at.is_some());

        scheduler.advance("q").await.unwrap();
        assert!(scheduler.advance("q").await.unwrap().is_none());
        assert!(matches!(scheduler.advance("missing").await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_daily_playlist_mixes_kinds() {
        let fixture = fixture().await;
        let state = &fixture.state;
        for seed in 0..10u8 {
            ingest_processed(state, wav_bytes(seed), "a.wav", MediaKind::Audio, "Audio").await;
        }
        for seed in 0..5u8 {
            ingest_processed(state, mp4_bytes(seed), "v.mp4", MediaKind::Video, "Video").await;
        }

        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let (playlist, entries) = state.scheduler().generate_daily(date).await.unwrap();
        assert_eq!(playlist.name, "daily-2024-06-01");
        assert_eq!(entries.len(), 10);
        assert!(state.playlists.verify_contiguous(playlist.id).await.unwrap());

        let mut audio = 0;
        for entry in &entries {
            let item = state.media.get_required(entry.media_id).await.unwrap();
            assert_eq!(item.status, MediaStatus::Approved);
            if item.kind == MediaKind::Audio {
                audio += 1;
            }
        }
        assert_eq!(audio, 7);

        // Regenerating replaces rather than appends.
        let (_, again) = state.scheduler().generate_daily(date).await.unwrap();
        assert_eq!(again.len(), 10);
        assert_eq!(state.playlists.len(playlist.id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_daily_playlist_with_short_supply() {
        let fixture = fixture().await;
        let state = &fixture.state;
        ingest_processed(state, wav_bytes(1), "a.wav", MediaKind::Audio, "Only").await;

        let date = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        let (_, entries) = state.scheduler().generate_daily(date).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_daily_playlist_without_content() {
        let fixture = fixture().await;
        let date = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let result = fixture.state.scheduler().generate_daily(date).await;
        assert!(matches!(result, Err(AppError::NotEligible(_))));
    }

    #[tokio::test]
    async fn test_export_m3u_lists_intros_and_items() {
        let narration = Arc::new(FakeNarration::default());
        let fixture = fixture_with(Arc::default(), narration.clone()).await;
        let state = &fixture.state;
        let with_intro = ingest_processed(state, wav_bytes(1), "a.wav", MediaKind::Audio, "Night Drive").await;
        narration.fail_speech.store(true, Ordering::SeqCst);
        let without_intro = ingest_processed(state, wav_bytes(2), "b.wav", MediaKind::Audio, "Dawn").await;
        assert!(!state.media.get_required(without_intro).await.unwrap().has_intro());

        let scheduler = state.scheduler();
        scheduler.append("current", with_intro).await.unwrap();
        scheduler.append("current", without_intro).await.unwrap();

        let key = scheduler.export_m3u("current").await.unwrap();
        assert_eq!(key, "playlists/current.m3u");
        let m3u = String::from_utf8(state.storage.read(&key).await.unwrap()).unwrap();
        let lines: Vec<&str> = m3u.lines().collect();

        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines[1], "#EXTINF:-1,DJ Intro - Night Drive");
        assert!(lines[2].ends_with(&format!("intros/{}.mp3", with_intro)));
        assert_eq!(lines[3], "#EXTINF:180,Night Drive - dj-kit");
        assert!(lines[4].ends_with(&format!("audio/approved/{}.mp3", with_intro)));
        assert_eq!(lines[5], "#EXTINF:180,Dawn - dj-kit");
        assert_eq!(lines.len(), 7);
        assert!(m3u.ends_with(".mp3\n"));
    }

    #[tokio::test]
    async fn test_transition_between_head_and_next() {
        let narration = Arc::new(FakeNarration::default());
        let fixture = fixture_with(Arc::default(), narration.clone()).await;
        let state = &fixture.state;
        let first = ingest_processed(state, wav_bytes(1), "a.wav", MediaKind::Audio, "Night Drive").await;
        let second = ingest_processed(state, wav_bytes(2), "b.wav", MediaKind::Audio, "Dawn").await;

        let scheduler = state.scheduler();
        scheduler.append("current", first).await.unwrap();
        assert!(scheduler.transition("current").await.unwrap().is_none());

        scheduler.append("current", second).await.unwrap();
        let transition = scheduler.transition("current").await.unwrap().unwrap();
        assert_eq!(transition.text, "Coming up next, something special.");
        assert!(!transition.used_fallback);

        narration.fail_text.store(true, Ordering::SeqCst);
        let transition = scheduler.transition("current").await.unwrap().unwrap();
        assert!(transition.used_fallback);
        assert!(transition.text.contains("Dawn"));

        assert!(matches!(
            scheduler.transition("missing").await,
            Err(AppError::NotFound(_))
        ));
    }
}
