// Storage target value object

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of object storage backing a migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageKind {
    /// Local filesystem directory
    LocalDisk,
    /// S3-compatible object storage
    S3,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::LocalDisk => write!(f, "LOCAL_DISK"),
            StorageKind::S3 => write!(f, "S3"),
        }
    }
}

/// Where a job stages and stores its converted disks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageTarget {
    pub kind: StorageKind,
    pub endpoint: String,
    pub bucket_or_path: String,
    pub region: Option<String>,
}

impl StorageTarget {
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            kind: StorageKind::LocalDisk,
            endpoint: String::new(),
            bucket_or_path: path.into(),
            region: None,
        }
    }

    pub fn s3(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        region: Option<String>,
    ) -> Self {
        Self {
            kind: StorageKind::S3,
            endpoint: endpoint.into(),
            bucket_or_path: bucket.into(),
            region,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_target_has_no_endpoint() {
        let target = StorageTarget::local("/var/lib/aldatu");
        assert_eq!(target.kind, StorageKind::LocalDisk);
        assert!(target.endpoint.is_empty());
        assert_eq!(target.bucket_or_path, "/var/lib/aldatu");
    }

    #[test]
    fn s3_target_keeps_region() {
        let target = StorageTarget::s3("https://s3.example.com", "migrations", Some("eu-west-1".into()));
        assert_eq!(target.kind, StorageKind::S3);
        assert_eq!(target.region.as_deref(), Some("eu-west-1"));
    }
}
