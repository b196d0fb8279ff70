//! Configuration module
//!
//! Settings are read from the environment (after loading `.env` when present).
//! Unset or unparsable values fall back to the defaults below; [`Config::validate`]
//! rejects combinations that cannot work.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::models::DedupPolicy;

const DATABASE_URL: &str = "sqlite://airwave.db";
const DB_MAX_CONNECTIONS: u32 = 8;
const DB_BUSY_TIMEOUT_MS: u64 = 5000;
const MEDIA_ROOT: &str = "./media";
const MAX_UPLOAD_SIZE_MB: u64 = 500;
const MAX_DURATION_SECS: f64 = 3600.0;
const AUDIO_BITRATE_KBPS: u32 = 192;
const LOUDNESS_TARGET_LUFS: f64 = -16.0;
const VIDEO_MAX_BITRATE_KBPS: u32 = 2000;
const VIDEO_HEIGHT: u32 = 720;
const NARRATION_URL: &str = "http://localhost:8080";
const NARRATION_TIMEOUT_SECS: u64 = 60;
const JOB_MAX_WORKERS: usize = 4;
const JOB_POLL_INTERVAL_MS: u64 = 1000;
const JOB_MAX_ATTEMPTS: i32 = 3;
const TRANSCODE_TIMEOUT_SECS: u64 = 1800;
const INTRO_TIMEOUT_SECS: u64 = 180;
const JOB_LEASE_GRACE_SECS: u64 = 60;
const JOB_REAP_INTERVAL_SECS: u64 = 30;
const RETENTION_DAYS: i64 = 30;
const SWEEP_INTERVAL_SECS: u64 = 3600;
const JOB_RETENTION_DAYS: i64 = 14;
const PLAYLIST_RETENTION_DAYS: i64 = 7;
const DAILY_PLAYLIST_SLOTS: usize = 50;
const DAILY_AUDIO_SHARE: f64 = 0.7;
const CURRENT_PLAYLIST: &str = "current";

#[derive(Clone, Debug)]
pub struct AirwaveConfig {
    pub environment: String,
    // Database
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_busy_timeout_ms: u64,
    // Storage and ingest
    pub media_root: PathBuf,
    pub max_upload_size_bytes: u64,
    pub max_duration_secs: f64,
    pub dedup_policy: DedupPolicy,
    // Transcoding
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub audio_bitrate_kbps: u32,
    pub loudness_target_lufs: f64,
    pub video_max_bitrate_kbps: u32,
    pub video_height: u32,
    // Narration service
    pub narration_url: String,
    pub narration_timeout_secs: u64,
    // Job queue
    pub job_max_workers: usize,
    pub job_poll_interval_ms: u64,
    pub job_max_attempts: i32,
    pub transcode_timeout_secs: u64,
    pub intro_timeout_secs: u64,
    /// Added to a kind's timeout to get its lease duration.
    pub job_lease_grace_secs: u64,
    pub job_reap_interval_secs: u64,
    // Retention
    pub retention_days: i64,
    pub sweep_interval_secs: u64,
    /// Finished jobs older than this are deleted by the sweeper. 0 = disabled.
    pub job_retention_days: i64,
    /// Non-current playlists older than this are deleted by the sweeper. 0 = disabled.
    pub playlist_retention_days: i64,
    // Scheduling
    pub daily_playlist_slots: usize,
    pub daily_audio_share: f64,
    pub current_playlist: String,
}

impl Default for AirwaveConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            database_url: DATABASE_URL.to_string(),
            db_max_connections: DB_MAX_CONNECTIONS,
            db_busy_timeout_ms: DB_BUSY_TIMEOUT_MS,
            media_root: PathBuf::from(MEDIA_ROOT),
            max_upload_size_bytes: MAX_UPLOAD_SIZE_MB * 1024 * 1024,
            max_duration_secs: MAX_DURATION_SECS,
            dedup_policy: DedupPolicy::default(),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            audio_bitrate_kbps: AUDIO_BITRATE_KBPS,
            loudness_target_lufs: LOUDNESS_TARGET_LUFS,
            video_max_bitrate_kbps: VIDEO_MAX_BITRATE_KBPS,
            video_height: VIDEO_HEIGHT,
            narration_url: NARRATION_URL.to_string(),
            narration_timeout_secs: NARRATION_TIMEOUT_SECS,
            job_max_workers: JOB_MAX_WORKERS,
            job_poll_interval_ms: JOB_POLL_INTERVAL_MS,
            job_max_attempts: JOB_MAX_ATTEMPTS,
            transcode_timeout_secs: TRANSCODE_TIMEOUT_SECS,
            intro_timeout_secs: INTRO_TIMEOUT_SECS,
            job_lease_grace_secs: JOB_LEASE_GRACE_SECS,
            job_reap_interval_secs: JOB_REAP_INTERVAL_SECS,
            retention_days: RETENTION_DAYS,
            sweep_interval_secs: SWEEP_INTERVAL_SECS,
            job_retention_days: JOB_RETENTION_DAYS,
            playlist_retention_days: PLAYLIST_RETENTION_DAYS,
            daily_playlist_slots: DAILY_PLAYLIST_SLOTS,
            daily_audio_share: DAILY_AUDIO_SHARE,
            current_playlist: CURRENT_PLAYLIST.to_string(),
        }
    }
}

/// Read `key` and parse it, falling back to `default` when unset or invalid.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl AirwaveConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let dedup_policy = match env::var("DEDUP_POLICY") {
            Ok(value) => value.parse::<DedupPolicy>()?,
            Err(_) => DedupPolicy::default(),
        };

        let max_upload_size_mb = env_or("MAX_UPLOAD_SIZE_MB", MAX_UPLOAD_SIZE_MB);

        let config = Self {
            environment: env::var("ENVIRONMENT")
                .or_else(|_| env::var("APP_ENV"))
                .unwrap_or_else(|_| "development".to_string()),
            database_url: env_string_or("DATABASE_URL", DATABASE_URL),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", DB_MAX_CONNECTIONS),
            db_busy_timeout_ms: env_or("DB_BUSY_TIMEOUT_MS", DB_BUSY_TIMEOUT_MS),
            media_root: PathBuf::from(env_string_or("MEDIA_ROOT", MEDIA_ROOT)),
            max_upload_size_bytes: max_upload_size_mb * 1024 * 1024,
            max_duration_secs: env_or("MAX_DURATION_SECS", MAX_DURATION_SECS),
            dedup_policy,
            ffmpeg_path: env_string_or("FFMPEG_PATH", "ffmpeg"),
            ffprobe_path: env_string_or("FFPROBE_PATH", "ffprobe"),
            audio_bitrate_kbps: env_or("AUDIO_BITRATE_KBPS", AUDIO_BITRATE_KBPS),
            loudness_target_lufs: env_or("LOUDNESS_TARGET_LUFS", LOUDNESS_TARGET_LUFS),
            video_max_bitrate_kbps: env_or("VIDEO_MAX_BITRATE_KBPS", VIDEO_MAX_BITRATE_KBPS),
            video_height: env_or("VIDEO_HEIGHT", VIDEO_HEIGHT),
            narration_url: env_string_or("NARRATION_URL", NARRATION_URL),
            narration_timeout_secs: env_or("NARRATION_TIMEOUT_SECS", NARRATION_TIMEOUT_SECS),
            job_max_workers: env_or("JOB_MAX_WORKERS", JOB_MAX_WORKERS),
            job_poll_interval_ms: env_or("JOB_POLL_INTERVAL_MS", JOB_POLL_INTERVAL_MS),
            job_max_attempts: env_or("JOB_MAX_ATTEMPTS", JOB_MAX_ATTEMPTS),
            transcode_timeout_secs: env_or("TRANSCODE_TIMEOUT_SECS", TRANSCODE_TIMEOUT_SECS),
            intro_timeout_secs: env_or("INTRO_TIMEOUT_SECS", INTRO_TIMEOUT_SECS),
            job_lease_grace_secs: env_or("JOB_LEASE_GRACE_SECS", JOB_LEASE_GRACE_SECS),
            job_reap_interval_secs: env_or("JOB_REAP_INTERVAL_SECS", JOB_REAP_INTERVAL_SECS),
            retention_days: env_or("RETENTION_DAYS", RETENTION_DAYS),
            sweep_interval_secs: env_or("SWEEP_INTERVAL_SECS", SWEEP_INTERVAL_SECS),
            job_retention_days: env_or("JOB_RETENTION_DAYS", JOB_RETENTION_DAYS),
            playlist_retention_days: env_or("PLAYLIST_RETENTION_DAYS", PLAYLIST_RETENTION_DAYS),
            daily_playlist_slots: env_or("DAILY_PLAYLIST_SLOTS", DAILY_PLAYLIST_SLOTS),
            daily_audio_share: env_or("DAILY_AUDIO_SHARE", DAILY_AUDIO_SHARE),
            current_playlist: env_string_or("CURRENT_PLAYLIST", CURRENT_PLAYLIST),
        };

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.database_url.starts_with("sqlite:") {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a SQLite connection string (sqlite://...)"
            ));
        }

        if self.db_max_connections == 0 {
            return Err(anyhow::anyhow!("DB_MAX_CONNECTIONS must be at least 1"));
        }

        if self.max_upload_size_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_UPLOAD_SIZE_MB must be greater than 0"));
        }

        if self.max_duration_secs <= 0.0 {
            return Err(anyhow::anyhow!("MAX_DURATION_SECS must be greater than 0"));
        }

        if self.job_max_workers == 0 {
            return Err(anyhow::anyhow!("JOB_MAX_WORKERS must be at least 1"));
        }

        if self.job_max_attempts < 1 {
            return Err(anyhow::anyhow!("JOB_MAX_ATTEMPTS must be at least 1"));
        }

        if self.retention_days < 1 {
            return Err(anyhow::anyhow!("RETENTION_DAYS must be at least 1"));
        }

        if !(0.0..=1.0).contains(&self.daily_audio_share) {
            return Err(anyhow::anyhow!(
                "DAILY_AUDIO_SHARE must be between 0.0 and 1.0"
            ));
        }

        if self.current_playlist.trim().is_empty() {
            return Err(anyhow::anyhow!("CURRENT_PLAYLIST cannot be empty"));
        }

        if !self.narration_url.starts_with("http://") && !self.narration_url.starts_with("https://")
        {
            return Err(anyhow::anyhow!("NARRATION_URL must be an http(s) URL"));
        }

        Ok(())
    }
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<AirwaveConfig>);

impl Default for Config {
    fn default() -> Self {
        Config(Box::default())
    }
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = AirwaveConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.0.validate()
    }

    pub fn settings(&self) -> &AirwaveConfig {
        &self.0
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let environment = self.0.environment.to_lowercase();
        environment == "production" || environment == "prod"
    }

    pub fn database_url(&self) -> &str {
        &self.0.database_url
    }

    pub fn media_root(&self) -> &PathBuf {
        &self.0.media_root
    }

    pub fn max_upload_size_bytes(&self) -> u64 {
        self.0.max_upload_size_bytes
    }

    pub fn dedup_policy(&self) -> DedupPolicy {
        self.0.dedup_policy
    }

    pub fn ffmpeg_path(&self) -> &str {
        &self.0.ffmpeg_path
    }

    pub fn ffprobe_path(&self) -> &str {
        &self.0.ffprobe_path
    }

    pub fn narration_url(&self) -> &str {
        &self.0.narration_url
    }

    pub fn narration_timeout(&self) -> Duration {
        Duration::from_secs(self.0.narration_timeout_secs)
    }

    pub fn current_playlist(&self) -> &str {
        &self.0.current_playlist
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.0.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_upload_size_bytes(), 500 * 1024 * 1024);
        assert_eq!(config.dedup_policy(), DedupPolicy::ReturnExisting);
        assert_eq!(config.current_playlist(), "current");
        assert!(!config.is_production());
    }

    #[test]
    fn test_validate_rejects_postgres_url() {
        let config = AirwaveConfig {
            database_url: "postgresql://localhost/airwave".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_validate_rejects_bad_audio_share() {
        let config = AirwaveConfig {
            daily_audio_share: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config = AirwaveConfig {
            job_max_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        env::set_var("AIRWAVE_TEST_ENV_OR_GARBAGE", "not-a-number");
        assert_eq!(env_or("AIRWAVE_TEST_ENV_OR_GARBAGE", 7u32), 7);
        env::set_var("AIRWAVE_TEST_ENV_OR_VALUE", " 12 ");
        assert_eq!(env_or("AIRWAVE_TEST_ENV_OR_VALUE", 7u32), 12);
        assert_eq!(env_or("AIRWAVE_TEST_ENV_OR_UNSET", 7u32), 7);
    }
}
