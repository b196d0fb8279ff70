//! Shared key generation for media artifacts.

use airwave_core::models::MediaKind;
use uuid::Uuid;

/// Directory under the media root that holds in-flight uploads.
pub const STAGING_DIR: &str = ".staging";

fn kind_dir(kind: MediaKind) -> &'static str {
    kind.as_str()
}

/// Key of an accepted upload that has not been transcoded yet.
pub fn original_key(kind: MediaKind, media_id: Uuid, extension: &str) -> String {
    format!("{}/pending/{}.{}", kind_dir(kind), media_id, extension)
}

/// Key of a replacement source supplied on retry. The random suffix keeps it
/// apart from the original it replaces until the item row points at it.
pub fn replacement_key(kind: MediaKind, media_id: Uuid, extension: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}/pending/{}-{}.{}", kind_dir(kind), media_id, &suffix[..8], extension)
}

/// Key of the normalized artifact the streaming engine plays.
pub fn transcoded_key(kind: MediaKind, media_id: Uuid) -> String {
    let extension = match kind {
        MediaKind::Audio => "mp3",
        MediaKind::Video => "mp4",
    };
    format!("{}/approved/{}.{}", kind_dir(kind), media_id, extension)
}

pub fn thumbnail_key(media_id: Uuid) -> String {
    format!("{}/approved/{}.jpg", kind_dir(MediaKind::Video), media_id)
}

pub fn intro_key(media_id: Uuid) -> String {
    format!("intros/{}.mp3", media_id)
}

/// Key of an exported playlist. Names are reduced to `[A-Za-z0-9_-]`.
pub fn playlist_export_key(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("playlists/{}.m3u", safe)
}

/// Reject keys that could escape the media root.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && !key.contains("..") && !key.starts_with('/') && !key.contains('\\')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_partitions_by_kind_and_status() {
        let id = Uuid::new_v4();
        assert_eq!(
            original_key(MediaKind::Audio, id, "wav"),
            format!("audio/pending/{}.wav", id)
        );
        assert_eq!(
            transcoded_key(MediaKind::Video, id),
            format!("video/approved/{}.mp4", id)
        );
        assert_eq!(transcoded_key(MediaKind::Audio, id), format!("audio/approved/{}.mp3", id));
        assert_eq!(intro_key(id), format!("intros/{}.mp3", id));
    }

    #[test]
    fn test_replacement_key_never_reuses_original() {
        let id = Uuid::new_v4();
        let original = original_key(MediaKind::Audio, id, "wav");
        let first = replacement_key(MediaKind::Audio, id, "wav");
        let second = replacement_key(MediaKind::Audio, id, "wav");
        assert_ne!(first, original);
        assert_ne!(first, second);
        assert!(first.starts_with(&format!("audio/pending/{}-", id)));
        assert!(first.ends_with(".wav"));
        assert!(is_valid_key(&first));
    }

    #[test]
    fn test_playlist_export_key_is_sanitized() {
        assert_eq!(playlist_export_key("daily-2024-06-01"), "playlists/daily-2024-06-01.m3u");
        assert_eq!(playlist_export_key("../etc/passwd"), "playlists/___etc_passwd.m3u");
        assert!(is_valid_key(&playlist_export_key("../x")));
    }

    #[test]
    fn test_invalid_keys() {
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("/etc/passwd"));
        assert!(!is_valid_key("audio/../../x"));
        assert!(is_valid_key("audio/pending/a.mp3"));
    }
}
