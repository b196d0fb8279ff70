//! Test fixtures: a temp media root, SQLite, and fake external tools.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use airwave_core::models::MediaKind;
use airwave_core::AirwaveConfig;
use airwave_db::{connect, connect_in_memory, run_migrations};
use airwave_processing::{MediaProbe, MediaTranscoder, NarrationClient, NarrationError, TranscodeError};
use airwave_storage::{LocalStorage, Storage, StorageError, StorageResult, TempPath};
use airwave_worker::JobQueueConfig;

use crate::state::{AppState, Components};

/// Originals containing this marker are rejected by ffprobe, like a truncated container.
pub const CORRUPT_MARKER: &[u8] = b"CORRUPT";

/// ffmpeg stand-in: "transcodes" by copying with a prefix.
pub struct FakeTranscoder {
    pub duration_secs: Mutex<Option<f64>>,
    pub fail_transcode: AtomicBool,
    pub tools_missing: AtomicBool,
    pub transcodes: AtomicUsize,
}

impl Default for FakeTranscoder {
    fn default() -> Self {
        Self {
            duration_secs: Mutex::new(Some(180.0)),
            fail_transcode: AtomicBool::new(false),
            tools_missing: AtomicBool::new(false),
            transcodes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MediaTranscoder for FakeTranscoder {
    async fn probe(&self, input: &Path) -> Result<MediaProbe, TranscodeError> {
        let data = tokio::fs::read(input)
            .await
            .map_err(|source| TranscodeError::Spawn { tool: "ffprobe", source })?;
        if data.windows(CORRUPT_MARKER.len()).any(|w| w == CORRUPT_MARKER) {
            return Err(TranscodeError::Failed {
                tool: "ffprobe",
                status: Some(1),
                stderr: "moov atom not found".to_string(),
            });
        }
        Ok(MediaProbe {
            duration_secs: *self.duration_secs.lock().unwrap(),
            bitrate: Some(128_000),
            format_name: Some("fake".to_string()),
            audio_codec: Some("pcm_s16le".to_string()),
            video_codec: Some("h264".to_string()),
        })
    }

    async fn transcode(&self, kind: MediaKind, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        self.transcodes.fetch_add(1, Ordering::SeqCst);
        if self.fail_transcode.load(Ordering::SeqCst) {
            return Err(TranscodeError::Failed {
                tool: "ffmpeg",
                status: Some(1),
                stderr: "Conversion failed!".to_string(),
            });
        }
        let mut data = format!("{}:", kind).into_bytes();
        data.extend(tokio::fs::read(input).await.map_err(|source| TranscodeError::Spawn { tool: "ffmpeg", source })?);
        tokio::fs::write(output, data)
            .await
            .map_err(|source| TranscodeError::Spawn { tool: "ffmpeg", source })
    }

    async fn thumbnail(&self, _input: &Path, output: &Path, _at_secs: f64) -> Result<(), TranscodeError> {
        tokio::fs::write(output, b"\xff\xd8\xff\xe0jpeg")
            .await
            .map_err(|source| TranscodeError::Spawn { tool: "ffmpeg", source })
    }

    async fn check_tools(&self) -> Result<(), TranscodeError> {
        if self.tools_missing.load(Ordering::SeqCst) {
            return Err(TranscodeError::Spawn {
                tool: "ffmpeg",
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
            });
        }
        Ok(())
    }
}

/// Narration service stand-in.
#[derive(Default)]
pub struct FakeNarration {
    pub fail_text: AtomicBool,
    pub fail_speech: AtomicBool,
    pub fail_health: AtomicBool,
    pub speech_calls: AtomicUsize,
}

#[async_trait]
impl NarrationClient for FakeNarration {
    async fn generate_text(&self, _prompt: &str, _max_tokens: u32, _temperature: f32) -> Result<String, NarrationError> {
        if self.fail_text.load(Ordering::SeqCst) {
            return Err(NarrationError::Status {
                status: 503,
                body: "model loading".to_string(),
            });
        }
        Ok("Coming up next, something special.".to_string())
    }

    async fn synthesize(&self, text: &str, _voice: &str, _speed: f32) -> Result<Bytes, NarrationError> {
        self.speech_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_speech.load(Ordering::SeqCst) {
            return Err(NarrationError::Status {
                status: 500,
                body: "tts crashed".to_string(),
            });
        }
        Ok(Bytes::from(format!("ID3{}", text)))
    }

    async fn health_check(&self) -> Result<(), NarrationError> {
        if self.fail_health.load(Ordering::SeqCst) {
            return Err(NarrationError::Status {
                status: 503,
                body: "down".to_string(),
            });
        }
        Ok(())
    }
}

/// Storage that delegates to another backend but can refuse commits.
pub struct FailingStorage {
    pub inner: Arc<dyn Storage>,
    pub fail_commit: AtomicBool,
}

impl FailingStorage {
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self {
            inner,
            fail_commit: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Storage for FailingStorage {
    fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        self.inner.resolve(key)
    }

    async fn stage(&self) -> StorageResult<TempPath> {
        self.inner.stage().await
    }

    async fn temp_for(&self, key: &str) -> StorageResult<TempPath> {
        self.inner.temp_for(key).await
    }

    async fn commit(&self, temp: TempPath, key: &str) -> StorageResult<u64> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed(format!("disk full writing {}", key)));
        }
        self.inner.commit(temp, key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.inner.put(key, data).await
    }

    async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.inner.read(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn content_length(&self, key: &str) -> StorageResult<u64> {
        self.inner.content_length(key).await
    }
}

pub struct TestFixture {
    pub state: Arc<AppState>,
    pub _dir: TempDir,
}

pub fn test_settings(media_root: &Path) -> AirwaveConfig {
    AirwaveConfig {
        media_root: media_root.to_path_buf(),
        max_upload_size_bytes: 1024 * 1024,
        max_duration_secs: 600.0,
        job_max_attempts: 3,
        daily_playlist_slots: 10,
        daily_audio_share: 0.7,
        ..AirwaveConfig::default()
    }
}

pub fn test_queue_config() -> JobQueueConfig {
    JobQueueConfig {
        max_attempts: 3,
        poll_interval: Duration::from_millis(20),
        reap_interval: Duration::ZERO,
        backoff_base: Duration::ZERO,
        ..JobQueueConfig::default()
    }
}

async fn build(pool: sqlx::SqlitePool, dir: TempDir, transcoder: Arc<FakeTranscoder>, narration: Arc<FakeNarration>) -> TestFixture {
    let media_root = dir.path().join("media");
    let storage = LocalStorage::new(&media_root).await.unwrap();
    let state = AppState::without_workers(
        Components {
            settings: test_settings(&media_root),
            pool,
            storage: Arc::new(storage),
            transcoder,
            narration,
        },
        test_queue_config(),
    );
    TestFixture { state, _dir: dir }
}

pub async fn fixture() -> TestFixture {
    fixture_with(Arc::default(), Arc::default()).await
}

pub async fn fixture_with(transcoder: Arc<FakeTranscoder>, narration: Arc<FakeNarration>) -> TestFixture {
    let pool = connect_in_memory().await.unwrap();
    build(pool, tempfile::tempdir().unwrap(), transcoder, narration).await
}

/// File-backed database, for tests that need concurrent connections.
pub async fn file_fixture() -> TestFixture {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("airwave.db").display());
    let pool = connect(&url, 8, Duration::from_secs(5)).await.unwrap();
    run_migrations(&pool).await.unwrap();
    build(pool, dir, Arc::default(), Arc::default()).await
}

/// A small WAV file; `seed` varies the content (and so the hash).
pub fn wav_bytes(seed: u8) -> Vec<u8> {
    let mut data = b"RIFF\x24\x08\x00\x00WAVEfmt \x10\x00\x00\x00\x01\x00\x02\x00".to_vec();
    data.extend(std::iter::repeat(seed).take(512));
    data
}

/// A small MP4 file; `seed` varies the content.
pub fn mp4_bytes(seed: u8) -> Vec<u8> {
    let mut data = vec![0x00, 0x00, 0x00, 0x20];
    data.extend_from_slice(b"ftypisom\x00\x00\x02\x00isomiso2avc1mp41");
    data.extend(std::iter::repeat(seed).take(512));
    data
}

/// Ingest `data` and run the pipeline to completion. Returns the media id.
pub async fn ingest_processed(state: &Arc<AppState>, data: Vec<u8>, filename: &str, kind: MediaKind, title: &str) -> uuid::Uuid {
    let receipt = state
        .ingest()
        .ingest(
            std::io::Cursor::new(data),
            filename,
            kind,
            crate::UploadMetadata {
                title: title.to_string(),
                uploader: Some("dj-kit".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    state.inline_dispatcher().drain().await.unwrap();
    receipt.media_id
}
