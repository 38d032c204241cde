//! Local filesystem object storage.
//!
//! Keys map to paths under a base directory; checksums are streaming
//! SHA-256, hex-encoded lowercase.

use aldatu_application::ports::{
    ByteStream, StorageAdapter, StorageError, StorageFactory,
};
use aldatu_domain::{StorageKind, StorageTarget};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub struct LocalStorageAdapter {
    base: PathBuf,
}

impl LocalStorageAdapter {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base.join(key)
    }
}

#[async_trait]
impl StorageAdapter for LocalStorageAdapter {
    async fn upload(
        &self,
        key: &str,
        mut content: ByteStream,
        _content_length: u64,
        _content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::UploadFailed {
                    key: key.to_string(),
                    message: e.to_string(),
                })?;
        }

        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| StorageError::UploadFailed {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        tokio::io::copy(&mut content, &mut file)
            .await
            .map_err(|e| StorageError::UploadFailed {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        file.flush().await.map_err(|e| StorageError::UploadFailed {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<ByteStream, StorageError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| StorageError::DownloadFailed {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        Ok(Box::new(file))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        if path.exists() {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.path_for(key).exists())
    }

    async fn checksum(&self, key: &str) -> Result<String, StorageError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(sha256_file(&path)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?)
    }
}

async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Factory selecting the adapter for a job's storage target. Only the
/// local variant is wired in this build; the S3 adapter lives behind
/// the same port and slots in here when configured.
#[derive(Debug, Default)]
pub struct LocalStorageFactory;

impl LocalStorageFactory {
    pub fn new() -> Self {
        Self
    }
}

impl StorageFactory for LocalStorageFactory {
    fn create(&self, target: &StorageTarget) -> Result<Arc<dyn StorageAdapter>, StorageError> {
        match target.kind {
            StorageKind::LocalDisk => Ok(Arc::new(LocalStorageAdapter::new(
                target.bucket_or_path.clone(),
            ))),
            StorageKind::S3 => Err(StorageError::Backend(
                "no S3 credentials configured for this worker".to_string(),
            )),
        }
    }
}
