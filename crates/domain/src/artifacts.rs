// Migration artifacts - immutable outputs of the upload stage

use crate::shared_kernel::{ArtifactId, JobId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// On-disk image format of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskFormat {
    Vmdk,
    Qcow2,
    Raw,
}

impl DiskFormat {
    /// The format name as understood by the conversion tool
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskFormat::Vmdk => "vmdk",
            DiskFormat::Qcow2 => "qcow2",
            DiskFormat::Raw => "raw",
        }
    }

    /// Parse a format name, case-insensitively. Unknown names fall back
    /// to qcow2, the target default.
    pub fn parse_or_default(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "vmdk" => DiskFormat::Vmdk,
            "raw" => DiskFormat::Raw,
            _ => DiskFormat::Qcow2,
        }
    }
}

impl fmt::Display for DiskFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A checksum with the algorithm that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: String,
    pub value: String,
}

impl Checksum {
    pub fn sha256(value: impl Into<String>) -> Self {
        Self {
            algorithm: "SHA256".to_string(),
            value: value.into(),
        }
    }

    /// Hex digests from different tools differ in casing; comparison is
    /// case-insensitive.
    pub fn matches(&self, other: &str) -> bool {
        self.value.eq_ignore_ascii_case(other)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

/// A produced migration output file. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub job_id: JobId,
    pub file_name: String,
    pub format: DiskFormat,
    pub checksum: Checksum,
    pub size_bytes: u64,
    pub storage_key: String,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(
        job_id: JobId,
        file_name: impl Into<String>,
        format: DiskFormat,
        checksum: Checksum,
        size_bytes: u64,
        storage_key: impl Into<String>,
    ) -> Self {
        Self {
            id: ArtifactId::new(),
            job_id,
            file_name: file_name.into(),
            format,
            checksum,
            size_bytes,
            storage_key: storage_key.into(),
            created_at: Utc::now(),
        }
    }
}
