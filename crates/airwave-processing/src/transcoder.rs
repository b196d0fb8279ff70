//! ffmpeg/ffprobe orchestration.
//!
//! Outputs are written to whatever path the caller passes; callers hand in a
//! temp path next to the final key and rename on success.

use airwave_core::models::MediaKind;
use airwave_core::AppError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::probe::MediaProbe;

/// Longest stderr excerpt kept for diagnostics.
const STDERR_TAIL: usize = 2000;

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("Failed to start {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with status {status:?}: {stderr}")]
    Failed {
        tool: &'static str,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Unreadable {tool} output: {message}")]
    BadOutput { tool: &'static str, message: String },
}

impl From<TranscodeError> for AppError {
    fn from(err: TranscodeError) -> Self {
        AppError::Transcode(err.to_string())
    }
}

/// Normalization targets, from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeProfile {
    pub audio_bitrate_kbps: u32,
    pub loudness_target_lufs: f64,
    pub video_max_bitrate_kbps: u32,
    pub video_height: u32,
}

impl Default for TranscodeProfile {
    fn default() -> Self {
        Self {
            audio_bitrate_kbps: 192,
            loudness_target_lufs: -16.0,
            video_max_bitrate_kbps: 2000,
            video_height: 720,
        }
    }
}

impl TranscodeProfile {
    pub fn from_config(config: &airwave_core::AirwaveConfig) -> Self {
        Self {
            audio_bitrate_kbps: config.audio_bitrate_kbps,
            loudness_target_lufs: config.loudness_target_lufs,
            video_max_bitrate_kbps: config.video_max_bitrate_kbps,
            video_height: config.video_height,
        }
    }

    fn head(input: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
        ]
    }

    /// MP3 at a fixed bitrate, 44.1 kHz stereo, EBU R128 loudness normalized.
    pub fn audio_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args = Self::head(input);
        args.extend([
            "-vn".to_string(),
            "-map".to_string(),
            "0:a:0".to_string(),
            "-af".to_string(),
            format!("loudnorm=I={}:TP=-1.5:LRA=11", self.loudness_target_lufs),
            "-ar".to_string(),
            "44100".to_string(),
            "-ac".to_string(),
            "2".to_string(),
            "-c:a".to_string(),
            "libmp3lame".to_string(),
            "-b:a".to_string(),
            format!("{}k", self.audio_bitrate_kbps),
            "-f".to_string(),
            "mp3".to_string(),
            output.to_string_lossy().to_string(),
        ]);
        args
    }

    /// H.264/AAC MP4 with bounded bitrate, scaled to the configured height.
    pub fn video_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args = Self::head(input);
        args.extend([
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "0:a:0?".to_string(),
            "-vf".to_string(),
            format!("scale=-2:{}", self.video_height),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "fast".to_string(),
            "-crf".to_string(),
            "23".to_string(),
            "-maxrate".to_string(),
            format!("{}k", self.video_max_bitrate_kbps),
            "-bufsize".to_string(),
            format!("{}k", self.video_max_bitrate_kbps * 2),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "128k".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-f".to_string(),
            "mp4".to_string(),
            output.to_string_lossy().to_string(),
        ]);
        args
    }

    pub fn thumbnail_args(&self, input: &Path, output: &Path, at_secs: f64) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-y".to_string(),
            "-ss".to_string(),
            format!("{:.3}", at_secs),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-frames:v".to_string(),
            "1".to_string(),
            "-vf".to_string(),
            "scale=320:240".to_string(),
            "-q:v".to_string(),
            "3".to_string(),
            "-f".to_string(),
            "image2".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }
}

/// Thumbnail offset: 5 seconds in, or halfway through shorter clips.
pub fn thumbnail_offset(duration_secs: Option<f64>) -> f64 {
    match duration_secs {
        Some(d) if d > 0.0 => (d / 2.0).min(5.0),
        _ => 0.0,
    }
}

#[async_trait]
pub trait MediaTranscoder: Send + Sync {
    async fn probe(&self, input: &Path) -> Result<MediaProbe, TranscodeError>;

    /// Normalize `input` into `output` for the given kind.
    async fn transcode(&self, kind: MediaKind, input: &Path, output: &Path) -> Result<(), TranscodeError>;

    async fn thumbnail(&self, input: &Path, output: &Path, at_secs: f64) -> Result<(), TranscodeError>;

    /// Confirm the external tools can be started.
    async fn check_tools(&self) -> Result<(), TranscodeError>;
}

pub struct FfmpegTranscoder {
    ffmpeg_path: String,
    ffprobe_path: String,
    profile: TranscodeProfile,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: String, ffprobe_path: String, profile: TranscodeProfile) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
            profile,
        }
    }

    fn stderr_tail(stderr: &[u8]) -> String {
        let text = String::from_utf8_lossy(stderr);
        let text = text.trim();
        let start = text.len().saturating_sub(STDERR_TAIL);
        // Stay on a char boundary.
        let start = (start..text.len()).find(|i| text.is_char_boundary(*i)).unwrap_or(text.len());
        text[start..].to_string()
    }

    /// Run a tool to completion. The child is killed if this future is dropped,
    /// which is how job timeouts stop a runaway ffmpeg.
    async fn run(&self, tool: &'static str, program: &str, args: &[String]) -> Result<Vec<u8>, TranscodeError> {
        let start = std::time::Instant::now();
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TranscodeError::Spawn { tool, source })?;

        if !output.status.success() {
            let stderr = Self::stderr_tail(&output.stderr);
            tracing::warn!(
                tool,
                status = ?output.status.code(),
                stderr = %stderr,
                "External tool failed"
            );
            return Err(TranscodeError::Failed {
                tool,
                status: output.status.code(),
                stderr,
            });
        }

        tracing::debug!(
            tool,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "External tool finished"
        );
        Ok(output.stdout)
    }
}

#[async_trait]
impl MediaTranscoder for FfmpegTranscoder {
    #[tracing::instrument(skip(self), fields(service = "ffprobe"))]
    async fn probe(&self, input: &Path) -> Result<MediaProbe, TranscodeError> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-show_format".to_string(),
            "-show_streams".to_string(),
            "-of".to_string(),
            "json".to_string(),
            input.to_string_lossy().to_string(),
        ];
        let stdout = self.run("ffprobe", &self.ffprobe_path, &args).await?;
        MediaProbe::from_ffprobe_json(&stdout).map_err(|e| TranscodeError::BadOutput {
            tool: "ffprobe",
            message: e.to_string(),
        })
    }

    #[tracing::instrument(skip(self), fields(service = "ffmpeg"))]
    async fn transcode(&self, kind: MediaKind, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        let args = match kind {
            MediaKind::Audio => self.profile.audio_args(input, output),
            MediaKind::Video => self.profile.video_args(input, output),
        };
        self.run("ffmpeg", &self.ffmpeg_path, &args).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(service = "ffmpeg"))]
    async fn thumbnail(&self, input: &Path, output: &Path, at_secs: f64) -> Result<(), TranscodeError> {
        let args = self.profile.thumbnail_args(input, output, at_secs);
        self.run("ffmpeg", &self.ffmpeg_path, &args).await?;
        Ok(())
    }
    async fn check_tools(&self) -> Result<(), TranscodeError> {
        let version = ["-version".to_string()];
        self.run("ffmpeg", &self.ffmpeg_path, &version).await?;
        self.run("ffprobe", &self.ffprobe_path, &version).await?;
        Ok(())
    }
}
