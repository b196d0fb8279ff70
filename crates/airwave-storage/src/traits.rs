//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement.

use airwave_core::AppError;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use thiserror::Error;

pub use tempfile::TempPath;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => AppError::NotFound(format!("Artifact {} not found", key)),
            other => AppError::Storage(other.to_string()),
        }
    }
}

/// Storage abstraction trait
///
/// Artifacts are addressed by key (see [`crate::keys`]). Every write lands in a
/// temporary file first and is renamed into place, so a reader never observes a
/// partially written artifact and a failed write never replaces a valid one.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Filesystem path for a key. External tools (ffmpeg, ffprobe, the
    /// streaming engine) read artifacts by path.
    fn resolve(&self, key: &str) -> StorageResult<PathBuf>;

    /// A fresh temporary file in the staging area, deleted on drop unless committed.
    async fn stage(&self) -> StorageResult<TempPath>;

    /// A fresh temporary file next to `key`'s final location, deleted on drop
    /// unless committed. The temp name keeps `key`'s extension.
    async fn temp_for(&self, key: &str) -> StorageResult<TempPath>;

    /// Atomically move a temporary file to `key`, replacing any previous artifact.
    async fn commit(&self, temp: TempPath, key: &str) -> StorageResult<u64>;

    /// Write `data` to `key` via a temporary file and rename.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    async fn read(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Delete an artifact. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get the size in bytes of an artifact, if it exists.
    async fn content_length(&self, key: &str) -> StorageResult<u64>;
}
