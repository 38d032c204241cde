//! Object storage contract. Local-filesystem and cloud-object
//! implementations are interchangeable behind this port.

use aldatu_domain::StorageTarget;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Readable byte stream handed across the port boundary.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Errors from object storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Upload failed for '{key}': {message}")]
    UploadFailed { key: String, message: String },

    #[error("Download failed for '{key}': {message}")]
    DownloadFailed { key: String, message: String },

    #[error("Storage failure: {0}")]
    Backend(String),
}

/// Storage adapter selected per job from its storage target.
///
/// Implementations above a size threshold are expected to switch to
/// multi-part uploads internally; callers never see the difference.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn upload(
        &self,
        key: &str,
        content: ByteStream,
        content_length: u64,
        content_type: Option<&str>,
    ) -> Result<(), StorageError>;

    async fn download(&self, key: &str) -> Result<ByteStream, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Hex-encoded checksum of the stored object (lowercase by
    /// convention, but consumers must not rely on casing).
    async fn checksum(&self, key: &str) -> Result<String, StorageError>;
}

/// Selects the adapter matching a job's storage target.
pub trait StorageFactory: Send + Sync {
    fn create(&self, target: &StorageTarget) -> Result<Arc<dyn StorageAdapter>, StorageError>;
}
