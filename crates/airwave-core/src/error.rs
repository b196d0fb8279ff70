//! Error types module
//!
//! All pipeline errors are unified under [`AppError`]. Operators log the full
//! error (and [`AppError::detailed_message`]); uploaders and other callers only
//! see [`ErrorMetadata::error_code`] and [`ErrorMetadata::client_message`].

use std::io;
use uuid::Uuid;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

use crate::models::{MediaKind, TransitionError};

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata describing how an error is presented to callers
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "DATABASE_ERROR")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden from clients
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Upload too large: more than {max} bytes")]
    SizeExceeded { max: u64 },

    #[error("Type mismatch: declared {declared}, content is {detected}")]
    TypeMismatch {
        declared: MediaKind,
        detected: MediaKind,
    },

    #[error("Duplicate content: already stored as {existing_id}")]
    DuplicateContent { existing_id: Uuid },

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("Not eligible: {0}")]
    NotEligible(String),

    #[error("Queue ordering conflict: {0}")]
    QueueConflict(String),

    #[error("Transcode error: {0}")]
    Transcode(String),

    #[error("Intro generation error: {0}")]
    IntroGeneration(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("UUID parsing error: {}", err))
    }
}

/// Static metadata for each variant: (error_code, recoverable, suggested_action, sensitive, log_level).
fn app_error_static_metadata(
    err: &AppError,
) -> (&'static str, bool, Option<&'static str>, bool, LogLevel) {
    match err {
        AppError::Database(_) => (
            "DATABASE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::Storage(_) => (
            "STORAGE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::InvalidInput(_) => (
            "INVALID_INPUT",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::NotFound(_) => (
            "NOT_FOUND",
            false,
            Some("Verify the resource ID exists"),
            false,
            LogLevel::Debug,
        ),
        AppError::UnsupportedFormat(_) => (
            "UNSUPPORTED_FORMAT",
            false,
            Some("Upload one of the supported audio or video formats"),
            false,
            LogLevel::Debug,
        ),
        AppError::SizeExceeded { .. } => (
            "SIZE_EXCEEDED",
            false,
            Some("Upload a smaller file"),
            false,
            LogLevel::Debug,
        ),
        AppError::TypeMismatch { .. } => (
            "TYPE_MISMATCH",
            false,
            Some("Declare the media kind that matches the file content"),
            false,
            LogLevel::Debug,
        ),
        AppError::DuplicateContent { .. } => (
            "DUPLICATE_CONTENT",
            false,
            Some("Use the existing media item"),
            false,
            LogLevel::Debug,
        ),
        AppError::InvalidTransition(_) => (
            "INVALID_TRANSITION",
            false,
            Some("Check the item's current status"),
            false,
            LogLevel::Warn,
        ),
        AppError::NotEligible(_) => (
            "NOT_ELIGIBLE",
            false,
            Some("Only approved media can be queued"),
            false,
            LogLevel::Debug,
        ),
        AppError::QueueConflict(_) => (
            "QUEUE_CONFLICT",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::Transcode(_) => (
            "TRANSCODE_ERROR",
            true,
            Some("Contact support if this error persists"),
            true,
            LogLevel::Error,
        ),
        AppError::IntroGeneration(_) => (
            "INTRO_GENERATION_ERROR",
            true,
            None,
            true,
            LogLevel::Warn,
        ),
        AppError::Internal(_) | AppError::InternalWithSource { .. } => (
            "INTERNAL_ERROR",
            false,
            Some("Contact support if this error persists"),
            true,
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::Database(_) => "Database",
            AppError::Storage(_) => "Storage",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::NotFound(_) => "NotFound",
            AppError::UnsupportedFormat(_) => "UnsupportedFormat",
            AppError::SizeExceeded { .. } => "SizeExceeded",
            AppError::TypeMismatch { .. } => "TypeMismatch",
            AppError::DuplicateContent { .. } => "DuplicateContent",
            AppError::InvalidTransition(_) => "InvalidTransition",
            AppError::NotEligible(_) => "NotEligible",
            AppError::QueueConflict(_) => "QueueConflict",
            AppError::Transcode(_) => "Transcode",
            AppError::IntroGeneration(_) => "IntroGeneration",
            AppError::Internal(_) => "Internal",
            AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// True for the three ingest rejections that are returned straight to the uploader.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::UnsupportedFormat(_)
                | AppError::SizeExceeded { .. }
                | AppError::TypeMismatch { .. }
        )
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).0
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).1
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).2
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).3
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).4
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Failed to access database".to_string(),
            AppError::Storage(_) => "Failed to access storage".to_string(),
            AppError::InvalidInput(ref msg) => msg.clone(),
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::UnsupportedFormat(ref msg) => msg.clone(),
            AppError::SizeExceeded { max } => {
                format!("File exceeds the maximum upload size of {} bytes", max)
            }
            AppError::TypeMismatch { declared, detected } => format!(
                "File was declared as {} but contains {}",
                declared, detected
            ),
            AppError::DuplicateContent { existing_id } => {
                format!("This content was already uploaded as {}", existing_id)
            }
            AppError::InvalidTransition(ref err) => err.to_string(),
            AppError::NotEligible(ref msg) => msg.clone(),
            AppError::QueueConflict(_) => "Playlist is busy, try again".to_string(),
            AppError::Transcode(_) => "Failed to process media".to_string(),
            AppError::IntroGeneration(_) => "Failed to generate intro".to_string(),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaStatus;

    #[test]
    fn test_error_metadata_database() {
        #[cfg(feature = "sqlx")]
        let err = AppError::from(sqlx::Error::PoolClosed);
        #[cfg(not(feature = "sqlx"))]
        let err = AppError::Database("pool closed".to_string());
        assert_eq!(err.error_code(), "DATABASE_ERROR");
        assert!(err.is_recoverable());
        assert_eq!(err.client_message(), "Failed to access database");
        assert!(err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_error_metadata_type_mismatch() {
        let err = AppError::TypeMismatch {
            declared: MediaKind::Audio,
            detected: MediaKind::Video,
        };
        assert_eq!(err.error_code(), "TYPE_MISMATCH");
        assert!(err.is_validation());
        assert!(!err.is_recoverable());
        assert!(err.client_message().contains("audio"));
        assert!(err.client_message().contains("video"));
        assert_eq!(err.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_transcode_error_hides_tool_output() {
        let err = AppError::Transcode("ffmpeg: moov atom not found at /srv/media/x".to_string());
        assert!(err.is_sensitive());
        assert_eq!(err.client_message(), "Failed to process media");
        assert!(err.detailed_message().contains("moov atom"));
    }

    #[test]
    fn test_transition_error_converts() {
        let transition = MediaStatus::Pending
            .transition(MediaStatus::Approved)
            .unwrap_err();
        let err: AppError = transition.into();
        assert_eq!(err.error_code(), "INVALID_TRANSITION");
        assert!(err.client_message().contains("pending -> approved"));
    }

    #[test]
    fn test_detailed_message_includes_chain() {
        let err: AppError = anyhow::anyhow!("disk full")
            .context("Failed to persist thumbnail")
            .into();
        let details = err.detailed_message();
        assert!(details.contains("Failed to persist thumbnail"));
        assert_eq!(err.client_message(), "Internal server error");
    }
}
