//! Airwave Processing Library
//!
//! Upload validation, ffprobe/ffmpeg orchestration and the AI narration client.
//! Nothing here touches the database; callers own state transitions.

pub mod narration;
pub mod probe;
pub mod sniff;
pub mod transcoder;
pub mod validator;

pub use narration::{
    compose_intro, compose_transition, DjTransition, HttpNarrationClient, IntroAudio, IntroRequest,
    NarrationClient, NarrationError, Personality, TransitionRequest,
};
pub use probe::MediaProbe;
pub use sniff::{sniff, SNIFF_LEN};
pub use transcoder::{FfmpegTranscoder, MediaTranscoder, TranscodeError, TranscodeProfile};
pub use validator::{IngestValidator, ValidatedUpload, ValidationError};
