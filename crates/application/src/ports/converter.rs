//! Disk-format conversion tool contract.

use crate::progress::ProgressSender;
use aldatu_domain::DiskFormat;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors from the conversion tool wrapper
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Conversion command failed (exit {exit_code}): {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    #[error("Conversion timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Conversion cancelled")]
    Cancelled,

    #[error("Conversion I/O failure: {0}")]
    Io(String),
}

/// Wrapper over the external disk conversion tool.
#[async_trait]
pub trait DiskConverter: Send + Sync {
    /// Convert `input` into `output` with the given target format,
    /// reporting fractional progress while the tool runs.
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        target_format: DiskFormat,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<(), ConvertError>;

    /// Inspect an image; returns the tool's metadata output verbatim.
    async fn inspect(&self, path: &Path) -> Result<String, ConvertError>;
}
