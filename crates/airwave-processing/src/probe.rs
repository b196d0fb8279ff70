//! ffprobe output parsing

use airwave_core::models::MediaKind;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct FFprobeOutput {
    format: Option<FFprobeFormat>,
    streams: Option<Vec<FFprobeStream>>,
}

#[derive(Debug, Deserialize)]
struct FFprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FFprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    duration: Option<String>,
    /// Cover art in audio files shows up as a video stream with this disposition.
    disposition: Option<FFprobeDisposition>,
}

#[derive(Debug, Deserialize)]
struct FFprobeDisposition {
    #[serde(default)]
    attached_pic: i32,
}

/// What ffprobe found in a stored original.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaProbe {
    pub duration_secs: Option<f64>,
    pub bitrate: Option<i64>,
    pub format_name: Option<String>,
    pub audio_codec: Option<String>,
    pub video_codec: Option<String>,
}

impl MediaProbe {
    /// Parse `ffprobe -show_format -show_streams -of json` output.
    pub fn from_ffprobe_json(stdout: &[u8]) -> Result<Self, serde_json::Error> {
        let output: FFprobeOutput = serde_json::from_slice(stdout)?;
        let streams = output.streams.unwrap_or_default();

        let audio = streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("audio"));
        let video = streams.iter().find(|s| {
            s.codec_type.as_deref() == Some("video")
                && s.disposition.as_ref().map_or(true, |d| d.attached_pic == 0)
        });

        let duration_secs = output
            .format
            .as_ref()
            .and_then(|f| f.duration.as_ref())
            .or_else(|| audio.or(video).and_then(|s| s.duration.as_ref()))
            .and_then(|d| d.parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d >= 0.0);

        let bitrate = output
            .format
            .as_ref()
            .and_then(|f| f.bit_rate.as_ref())
            .and_then(|b| b.parse::<i64>().ok());

        Ok(Self {
            duration_secs,
            bitrate,
            format_name: output.format.and_then(|f| f.format_name),
            audio_codec: audio.and_then(|s| s.codec_name.clone()),
            video_codec: video.and_then(|s| s.codec_name.clone()),
        })
    }

    /// Whether the probed streams fit the declared kind: audio needs an audio
    /// stream, video needs a real (non cover-art) video stream.
    pub fn matches_kind(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.audio_codec.is_some(),
            MediaKind::Video => self.video_codec.is_some(),
        }
    }
}
