//! Authoritative allow-list of accepted upload containers.
//!
//! Extension checks, MIME reporting and byte sniffing all resolve to a
//! [`ContainerFormat`]; nothing else in the workspace keeps its own list.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::Path;

use crate::models::MediaKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Mp3,
    Wav,
    Ogg,
    Flac,
    M4a,
    Aac,
    Mp4,
    Mov,
    Webm,
    Mkv,
    Avi,
}

impl ContainerFormat {
    pub const ALL: [ContainerFormat; 11] = [
        ContainerFormat::Mp3,
        ContainerFormat::Wav,
        ContainerFormat::Ogg,
        ContainerFormat::Flac,
        ContainerFormat::M4a,
        ContainerFormat::Aac,
        ContainerFormat::Mp4,
        ContainerFormat::Mov,
        ContainerFormat::Webm,
        ContainerFormat::Mkv,
        ContainerFormat::Avi,
    ];

    pub fn kind(&self) -> MediaKind {
        match self {
            ContainerFormat::Mp3
            | ContainerFormat::Wav
            | ContainerFormat::Ogg
            | ContainerFormat::Flac
            | ContainerFormat::M4a
            | ContainerFormat::Aac => MediaKind::Audio,
            ContainerFormat::Mp4
            | ContainerFormat::Mov
            | ContainerFormat::Webm
            | ContainerFormat::Mkv
            | ContainerFormat::Avi => MediaKind::Video,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ContainerFormat::Mp3 => "audio/mpeg",
            ContainerFormat::Wav => "audio/wav",
            ContainerFormat::Ogg => "audio/ogg",
            ContainerFormat::Flac => "audio/flac",
            ContainerFormat::M4a => "audio/mp4",
            ContainerFormat::Aac => "audio/aac",
            ContainerFormat::Mp4 => "video/mp4",
            ContainerFormat::Mov => "video/quicktime",
            ContainerFormat::Webm => "video/webm",
            ContainerFormat::Mkv => "video/x-matroska",
            ContainerFormat::Avi => "video/x-msvideo",
        }
    }

    /// Accepted file extensions; the first entry is canonical.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            ContainerFormat::Mp3 => &["mp3"],
            ContainerFormat::Wav => &["wav"],
            ContainerFormat::Ogg => &["ogg", "oga"],
            ContainerFormat::Flac => &["flac"],
            ContainerFormat::M4a => &["m4a"],
            ContainerFormat::Aac => &["aac"],
            ContainerFormat::Mp4 => &["mp4", "m4v"],
            ContainerFormat::Mov => &["mov"],
            ContainerFormat::Webm => &["webm"],
            ContainerFormat::Mkv => &["mkv"],
            ContainerFormat::Avi => &["avi"],
        }
    }

    pub fn canonical_extension(&self) -> &'static str {
        self.extensions()[0]
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        let extension = extension.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.extensions().contains(&extension.as_str()))
    }

    /// Resolve a declared filename to a format, if its extension is on the list.
    pub fn from_filename(filename: &str) -> Option<Self> {
        Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Every accepted extension for one media kind, for error messages.
    pub fn allowed_extensions(kind: MediaKind) -> Vec<&'static str> {
        Self::ALL
            .iter()
            .filter(|format| format.kind() == kind)
            .flat_map(|format| format.extensions().iter().copied())
            .collect()
    }
}

impl Display for ContainerFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.canonical_extension())
    }
}
