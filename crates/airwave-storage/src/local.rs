use crate::keys::{is_valid_key, STAGING_DIR};
use crate::traits::{Storage, StorageError, StorageResult, TempPath};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Local filesystem storage rooted at the media directory
#[derive(Clone, Debug)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// Creates the media root and its staging directory if they are missing.
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(base_path.join(STAGING_DIR))
            .await
            .map_err(|e| {
                StorageError::ConfigError(format!(
                    "Failed to create storage directory {}: {}",
                    base_path.display(),
                    e
                ))
            })?;

        Ok(LocalStorage { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Convert storage key to filesystem path with security validation
    ///
    /// Rejects keys containing traversal sequences and keys that resolve
    /// outside the media root through existing symlinks.
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        if !is_valid_key(storage_key) {
            return Err(StorageError::InvalidKey(format!(
                "Storage key '{}' contains invalid characters",
                storage_key
            )));
        }

        let path = self.base_path.join(storage_key);

        if let Ok(canonical) = path.canonicalize() {
            let base_canonical = self.base_path.canonicalize().map_err(|e| {
                StorageError::ConfigError(format!("Failed to canonicalize base path: {}", e))
            })?;
            if canonical.strip_prefix(&base_canonical).is_err() {
                return Err(StorageError::InvalidKey(
                    "Storage key resolves outside storage directory".to_string(),
                ));
            }
        }

        Ok(path)
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn temp_in(dir: &Path, suffix: &str) -> StorageResult<TempPath> {
        let file = tempfile::Builder::new()
            .prefix(".tmp-")
            .suffix(suffix)
            .tempfile_in(dir)
            .map_err(|e| {
                StorageError::WriteFailed(format!(
                    "Failed to create temp file in {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        Ok(file.into_temp_path())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        self.key_to_path(key)
    }

    async fn stage(&self) -> StorageResult<TempPath> {
        let dir = self.base_path.join(STAGING_DIR);
        fs::create_dir_all(&dir).await?;
        Self::temp_in(&dir, ".part")
    }

    async fn temp_for(&self, key: &str) -> StorageResult<TempPath> {
        let path = self.key_to_path(key)?;
        self.ensure_parent_dir(&path).await?;
        let suffix = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        let dir = path.parent().unwrap_or(&self.base_path);
        Self::temp_in(dir, &suffix)
    }

    async fn commit(&self, temp: TempPath, key: &str) -> StorageResult<u64> {
        let path = self.key_to_path(key)?;
        self.ensure_parent_dir(&path).await?;

        // A failed persist hands the guard back in the error; dropping it removes the temp file.
        let target = path.clone();
        tokio::task::spawn_blocking(move || temp.persist(&target))
            .await
            .map_err(|e| StorageError::WriteFailed(format!("Commit task failed: {}", e)))?
            .map_err(|e| {
                StorageError::WriteFailed(format!(
                    "Failed to move {} into {}: {}",
                    e.path.display(),
                    path.display(),
                    e.error
                ))
            })?;

        let size = fs::metadata(&path).await?.len();
        tracing::debug!(key = %key, size_bytes = size, "Artifact committed");
        Ok(size)
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let start = std::time::Instant::now();
        let temp = self.temp_for(key).await?;

        let mut file = fs::File::create(&temp).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to create file {}: {}", temp.display(), e))
        })?;
        file.write_all(&data).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to write file {}: {}", temp.display(), e))
        })?;
        file.sync_all().await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to sync file {}: {}", temp.display(), e))
        })?;
        drop(file);

        self.commit(temp, key).await?;

        tracing::info!(
            key = %key,
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage write successful"
        );
        Ok(())
    }

    async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.key_to_path(key)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(key.to_string()));
        }

        fs::read(&path).await.map_err(|e| {
            StorageError::ReadFailed(format!("Failed to read file {}: {}", path.display(), e))
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_to_path(key)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(key = %key, "Local storage delete successful");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "Failed to delete file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(key)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    async fn content_length(&self, key: &str) -> StorageResult<u64> {
        let path = self.key_to_path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_put_and_read() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        storage
            .put("playlists/current.m3u", Bytes::from_static(b"#EXTM3U\n"))
            .await
            .unwrap();
        assert_eq!(storage.read("playlists/current.m3u").await.unwrap(), b"#EXTM3U\n");
        assert_eq!(storage.content_length("playlists/current.m3u").await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        let result = storage.read("../../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.delete("../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.exists("/etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_delete_nonexistent_is_ok() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        assert!(storage.delete("audio/pending/missing.mp3").await.is_ok());
        assert!(matches!(
            storage.content_length("audio/pending/missing.mp3").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_commit_replaces_existing_artifact() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let key = "audio/approved/track.mp3";
        storage.put(key, Bytes::from_static(b"old")).await.unwrap();

        let temp = storage.temp_for(key).await.unwrap();
        assert_eq!(temp.extension().and_then(|e| e.to_str()), Some("mp3"));
        tokio::fs::write(&temp, b"new").await.unwrap();
        let size = storage.commit(temp, key).await.unwrap();

        assert_eq!(size, 3);
        assert_eq!(storage.read(key).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_failed_commit_removes_temp_file() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        // A non-empty directory sits where the artifact should go.
        storage
            .put("audio/pending/taken.mp3/inner.mp3", Bytes::from_static(b"x"))
            .await
            .unwrap();

        let staged = storage.stage().await.unwrap();
        let staged_path = staged.to_path_buf();
        tokio::fs::write(&staged, b"ID3data").await.unwrap();

        let result = storage.commit(staged, "audio/pending/taken.mp3").await;
        assert!(matches!(result, Err(StorageError::WriteFailed(_))));
        assert!(!staged_path.exists());
        assert!(storage.exists("audio/pending/taken.mp3/inner.mp3").await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_temp_leaves_artifact_untouched() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let key = "video/approved/clip.mp4";
        storage.put(key, Bytes::from_static(b"valid")).await.unwrap();

        let temp = storage.temp_for(key).await.unwrap();
        let temp_path = temp.to_path_buf();
        tokio::fs::write(&temp, b"partial").await.unwrap();
        drop(temp);

        assert!(!temp_path.exists());
        assert_eq!(storage.read(key).await.unwrap(), b"valid");
    }

    #[tokio::test]
    async fn test_staged_upload_moves_into_partition() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        let staged = storage.stage().await.unwrap();
        assert!(staged.starts_with(dir.path().join(STAGING_DIR)));
        tokio::fs::write(&staged, b"RIFF....WAVE").await.unwrap();

        let staged_path = staged.to_path_buf();
        storage.commit(staged, "audio/pending/abc.wav").await.unwrap();
        assert!(!staged_path.exists());
        assert!(storage.exists("audio/pending/abc.wav").await.unwrap());
        assert_eq!(
            storage.resolve("audio/pending/abc.wav").unwrap(),
            dir.path().join("audio/pending/abc.wav")
        );
    }
}
