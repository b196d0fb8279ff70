//! Ingest validation.
//!
//! One pass over the upload stream: enforce the size ceiling, sniff the
//! container, hash with SHA-256 and spill to a staging file. Nothing is
//! written to the database here.

use airwave_core::models::MediaKind;
use airwave_core::{AppError, ContainerFormat};
use airwave_storage::{Storage, StorageError, TempPath};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::sniff::{is_generic_iso_media, sniff, SNIFF_LEN};

const CHUNK_SIZE: usize = 64 * 1024;

/// Upload rejections returned straight to the uploader
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("File too large (max: {max} bytes)")]
    SizeExceeded { max: u64 },

    #[error("Declared {declared} but content is {detected}")]
    TypeMismatch {
        declared: MediaKind,
        detected: MediaKind,
    },

    #[error("Failed to read upload: {0}")]
    Read(#[from] std::io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::UnsupportedFormat(msg) => AppError::UnsupportedFormat(msg),
            ValidationError::SizeExceeded { max } => AppError::SizeExceeded { max },
            ValidationError::TypeMismatch { declared, detected } => {
                AppError::TypeMismatch { declared, detected }
            }
            ValidationError::Read(e) => AppError::InvalidInput(format!("Failed to read upload: {}", e)),
            ValidationError::Storage(e) => e.into(),
        }
    }
}

/// An upload that passed validation and sits in the staging area.
///
/// Dropping it deletes the staged bytes.
#[derive(Debug)]
pub struct ValidatedUpload {
    pub staged: TempPath,
    pub format: ContainerFormat,
    pub content_hash: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct IngestValidator {
    max_size_bytes: u64,
}

impl IngestValidator {
    pub fn new(max_size_bytes: u64) -> Self {
        Self { max_size_bytes }
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// The declared filename must carry an extension allowed for the declared kind.
    pub fn check_declared(filename: &str, kind: MediaKind) -> Result<ContainerFormat, ValidationError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .ok_or_else(|| {
                ValidationError::UnsupportedFormat(format!("'{}' has no file extension", filename))
            })?;

        match ContainerFormat::from_extension(&extension) {
            Some(format) if format.kind() == kind => Ok(format),
            _ => Err(ValidationError::UnsupportedFormat(format!(
                ".{} is not an accepted {} extension (allowed: {})",
                extension,
                kind,
                ContainerFormat::allowed_extensions(kind).join(", ")
            ))),
        }
    }

    fn classify(header: &[u8], declared: MediaKind) -> Result<ContainerFormat, ValidationError> {
        let detected = sniff(header).ok_or_else(|| {
            ValidationError::UnsupportedFormat("content is not a recognized audio or video container".to_string())
        })?;

        // Audio-only MP4 files often carry a generic brand.
        if detected == ContainerFormat::Mp4 && declared == MediaKind::Audio && is_generic_iso_media(header) {
            return Ok(ContainerFormat::M4a);
        }

        if detected.kind() != declared {
            return Err(ValidationError::TypeMismatch {
                declared,
                detected: detected.kind(),
            });
        }
        Ok(detected)
    }

    /// Validate an upload stream and stage its bytes.
    ///
    /// The stream is read in fixed chunks; exceeding the size ceiling aborts
    /// immediately and the staged bytes are discarded.
    #[tracing::instrument(skip(self, reader, storage), fields(filename = %filename, kind = %declared))]
    pub async fn validate<R>(
        &self,
        mut reader: R,
        filename: &str,
        declared: MediaKind,
        storage: &dyn Storage,
    ) -> Result<ValidatedUpload, ValidationError>
    where
        R: AsyncRead + Unpin + Send,
    {
        Self::check_declared(filename, declared)?;

        let staged = storage.stage().await?;
        let mut file = tokio::fs::File::create(&staged).await?;
        let mut hasher = Sha256::new();
        let mut header: Vec<u8> = Vec::with_capacity(SNIFF_LEN);
        let mut format = None;
        let mut total: u64 = 0;
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
            if total > self.max_size_bytes {
                tracing::debug!(read_bytes = total, max = self.max_size_bytes, "Upload exceeds size limit");
                return Err(ValidationError::SizeExceeded {
                    max: self.max_size_bytes,
                });
            }

            let chunk = &buf[..n];
            if format.is_none() {
                let wanted = SNIFF_LEN - header.len();
                header.extend_from_slice(&chunk[..wanted.min(n)]);
                if header.len() == SNIFF_LEN {
                    format = Some(Self::classify(&header, declared)?);
                }
            }

            hasher.update(chunk);
            file.write_all(chunk).await?;
        }

        if total == 0 {
            return Err(ValidationError::UnsupportedFormat("upload is empty".to_string()));
        }
        let format = match format {
            Some(format) => format,
            None => Self::classify(&header, declared)?,
        };

        file.sync_all().await?;
        drop(file);

        let content_hash = hex::encode(hasher.finalize());
        tracing::debug!(
            content_hash = %content_hash,
            size_bytes = total,
            format = %format,
            "Upload validated"
        );

        Ok(ValidatedUpload {
            staged,
            format,
            content_hash,
            size_bytes: total,
        })
    }
}
