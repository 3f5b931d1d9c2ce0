//! Durable storage for archive objects.
//!
//! Objects are written through a streaming upload: the caller opens an
//! upload, writes chunks, and then either completes it or aborts it. An
//! object only becomes visible under its key once the upload completes, so
//! a failed run never leaves a partial archive behind.
//!
//! - **Filesystem**: writes to a temporary file next to the target, renamed
//!   into place on completion
//! - **S3**: multipart upload, completed or aborted as a whole

mod filesystem;
#[cfg(test)]
pub mod memory;
#[cfg(feature = "s3-storage")]
mod s3;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
pub use filesystem::FilesystemArchiveStore;
#[cfg(feature = "s3-storage")]
pub use s3::S3ArchiveStore;
use thiserror::Error;
use tracing::info;

use crate::config::StorageConfig;

/// Content type of archive objects.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Errors that can occur during archive storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A storage backend that archive objects are uploaded to.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Create the container (directory or bucket) if it doesn't exist.
    /// An existing container is not an error.
    async fn ensure_container(&self) -> StorageResult<()>;

    /// Begin a streaming upload of a new object.
    async fn start_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> StorageResult<Box<dyn ObjectUpload>>;

    /// Whether a completed object exists under `key`.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Location of the object under `key`, for logs and reports.
    fn url(&self, key: &str) -> String;

    fn backend_name(&self) -> &'static str;
}

/// An in-progress upload. Must end with exactly one of
/// [`complete`](ObjectUpload::complete) or [`abort`](ObjectUpload::abort).
#[async_trait]
pub trait ObjectUpload: Send {
    /// Append a chunk to the object.
    async fn write(&mut self, chunk: Bytes) -> StorageResult<()>;

    /// Make the object visible under its key.
    async fn complete(self: Box<Self>) -> StorageResult<()>;

    /// Discard everything written so far.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}

/// Reject keys that could escape the container or produce odd paths.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|s| s.is_empty() || s == "." || s == "..");
    if invalid {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Create an archive store from configuration.
pub async fn create_archive_store(config: &StorageConfig) -> StorageResult<Arc<dyn ArchiveStore>> {
    match config {
        StorageConfig::None => Err(StorageError::Config(
            "No [storage] backend configured".to_string(),
        )),
        StorageConfig::Filesystem(fs_config) => {
            info!(path = %fs_config.path, "Using filesystem archive storage");
            Ok(Arc::new(FilesystemArchiveStore::new(fs_config.clone())))
        }
        #[cfg(feature = "s3-storage")]
        StorageConfig::S3(s3_config) => {
            info!(bucket = %s3_config.bucket, "Using S3 archive storage");
            Ok(Arc::new(S3ArchiveStore::new(s3_config.clone()).await?))
        }
        #[cfg(not(feature = "s3-storage"))]
        StorageConfig::S3(_) => Err(StorageError::Config(
            "S3 archive storage requires the 's3-storage' feature. \
                Rebuild with: cargo build --features s3-storage"
                .to_string(),
        )),
    }
}
