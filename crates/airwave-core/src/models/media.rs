use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::status::MediaStatus;
use crate::formats::ContainerFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "audio" => Ok(MediaKind::Audio),
            "video" => Ok(MediaKind::Video),
            _ => Err(anyhow::anyhow!("Invalid media kind: {}", s)),
        }
    }
}

/// What to do when an upload's content hash matches a stored item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    #[default]
    ReturnExisting,
    Reject,
}

impl FromStr for DedupPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "return_existing" | "existing" => Ok(DedupPolicy::ReturnExisting),
            "reject" => Ok(DedupPolicy::Reject),
            _ => Err(anyhow::anyhow!("Invalid dedup policy: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: Uuid,
    pub content_hash: String,
    pub original_filename: String,
    pub kind: MediaKind,
    pub status: MediaStatus,
    pub mime_type: String,
    pub size_bytes: i64,
    pub duration_secs: Option<f64>,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub uploader: Option<String>,
    /// Validated upload as received, under `{kind}/pending/`.
    pub original_key: Option<String>,
    pub transcoded_key: Option<String>,
    pub thumbnail_key: Option<String>,
    pub intro_text: Option<String>,
    pub intro_audio_key: Option<String>,
    pub played_count: i64,
    pub last_played_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for MediaItem {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let decode = |column: &str, e: anyhow::Error| {
            sqlx::Error::Decode(format!("Failed to parse {}: {}", column, e).into())
        };
        let tags: String = row.try_get("tags")?;

        Ok(MediaItem {
            id: row.try_get("id")?,
            content_hash: row.try_get("content_hash")?,
            original_filename: row.try_get("original_filename")?,
            kind: row
                .try_get::<String, _>("kind")?
                .parse()
                .map_err(|e| decode("kind", e))?,
            status: row
                .try_get::<String, _>("status")?
                .parse()
                .map_err(|e| decode("status", e))?,
            mime_type: row.try_get("mime_type")?,
            size_bytes: row.try_get("size_bytes")?,
            duration_secs: row.try_get("duration_secs")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            category: row.try_get("category")?,
            tags: serde_json::from_str(&tags).map_err(|e| decode("tags", e.into()))?,
            uploader: row.try_get("uploader")?,
            original_key: row.try_get("original_key")?,
            transcoded_key: row.try_get("transcoded_key")?,
            thumbnail_key: row.try_get("thumbnail_key")?,
            intro_text: row.try_get("intro_text")?,
            intro_audio_key: row.try_get("intro_audio_key")?,
            played_count: row.try_get("played_count")?,
            last_played_at: row.try_get("last_played_at")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            processed_at: row.try_get("processed_at")?,
        })
    }
}

impl MediaItem {
    /// Every stored artifact the item owns.
    pub fn artifact_keys(&self) -> Vec<&str> {
        [
            self.original_key.as_deref(),
            self.transcoded_key.as_deref(),
            self.thumbnail_key.as_deref(),
            self.intro_audio_key.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// The normalized artifact the streaming engine plays.
    pub fn playable_key(&self) -> Option<&str> {
        self.transcoded_key.as_deref()
    }

    pub fn has_intro(&self) -> bool {
        self.intro_audio_key.is_some()
    }
}

/// A validated upload that has not been reserved in the dedup index yet.
#[derive(Debug, Clone)]
pub struct MediaDraft {
    pub content_hash: String,
    pub original_filename: String,
    pub kind: MediaKind,
    pub format: ContainerFormat,
    pub size_bytes: i64,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub uploader: Option<String>,
}

impl MediaDraft {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

/// Outcome of a dedup lookup-or-reserve.
#[derive(Debug, Clone)]
pub enum Reservation {
    /// This caller created the row; it owns storing the artifact.
    Reserved(MediaItem),
    /// A non-archived item with the same content hash already exists.
    Existing(MediaItem),
}

impl Reservation {
    pub fn item(&self) -> &MediaItem {
        match self {
            Reservation::Reserved(item) | Reservation::Existing(item) => item,
        }
    }

    pub fn is_reserved(&self) -> bool {
        matches!(self, Reservation::Reserved(_))
    }
}

/// Synchronous acknowledgment returned to the uploader.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub media_id: Uuid,
    pub status: MediaStatus,
    pub duplicate: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaTransition {
    pub media_id: Uuid,
    pub from_status: Option<MediaStatus>,
    pub to_status: MediaStatus,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for MediaTransition {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let parse = |value: String| {
            value.parse::<MediaStatus>().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse media status: {}", e).into())
            })
        };

        Ok(MediaTransition {
            media_id: row.try_get("media_id")?,
            from_status: row
                .try_get::<Option<String>, _>("from_status")?
                .map(parse)
                .transpose()?,
            to_status: parse(row.try_get("to_status")?)?,
            note: row.try_get("note")?,
            at: row.try_get("at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item() -> MediaItem {
        MediaItem {
            id: Uuid::new_v4(),
            content_hash: "ab".repeat(32),
            original_filename: "set.wav".to_string(),
            kind: MediaKind::Audio,
            status: MediaStatus::Approved,
            mime_type: "audio/wav".to_string(),
            size_bytes: 10 * 1024 * 1024,
            duration_secs: Some(61.5),
            title: "Late set".to_string(),
            description: None,
            category: None,
            tags: vec![],
            uploader: None,
            original_key: Some("audio/pending/x.wav".to_string()),
            transcoded_key: Some("audio/approved/x.mp3".to_string()),
            thumbnail_key: None,
            intro_text: None,
            intro_audio_key: None,
            played_count: 0,
            last_played_at: None,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            processed_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_media_kind_parse() {
        assert_eq!("Audio".parse::<MediaKind>().unwrap(), MediaKind::Audio);
        assert_eq!("video".parse::<MediaKind>().unwrap(), MediaKind::Video);
        assert!("image".parse::<MediaKind>().is_err());
    }

    #[test]
    fn test_dedup_policy_parse() {
        assert_eq!(
            "return_existing".parse::<DedupPolicy>().unwrap(),
            DedupPolicy::ReturnExisting
        );
        assert_eq!("REJECT".parse::<DedupPolicy>().unwrap(), DedupPolicy::Reject);
        assert!("merge".parse::<DedupPolicy>().is_err());
        assert_eq!(DedupPolicy::default(), DedupPolicy::ReturnExisting);
    }

    #[test]
    fn test_artifact_keys_skip_missing() {
        let mut item = sample_item();
        assert_eq!(item.artifact_keys().len(), 2);
        item.intro_audio_key = Some("intros/x.mp3".to_string());
        assert_eq!(item.artifact_keys().len(), 3);
        assert!(item.has_intro());
        assert_eq!(item.playable_key(), Some("audio/approved/x.mp3"));
    }
}
