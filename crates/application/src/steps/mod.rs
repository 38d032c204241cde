//! One performer per step kind. All of them run under the generic
//! executor protocol; they only implement the external operation and
//! report raw progress.

mod convert;
mod export;
mod import;
mod incremental;
mod upload;
mod verify;

pub use convert::ConvertDiskPerformer;
pub use export::ExportVmdkPerformer;
pub use import::ImportToPvePerformer;
pub use incremental::{
    ApplyDeltaPerformer, EnableCbtPerformer, FinalSyncCutoverPerformer, IncrementalPullPerformer,
};
pub use upload::UploadArtifactPerformer;
pub use verify::VerifyPerformer;

use crate::executor::PerformError;
use crate::ports::StorageAdapter;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Stream a stored object into a staged local file; returns its size.
pub(crate) async fn download_to(
    storage: &dyn StorageAdapter,
    key: &str,
    path: &Path,
) -> Result<u64, PerformError> {
    let mut reader = storage.download(key).await?;
    let mut file = tokio::fs::File::create(path).await?;
    let bytes = tokio::io::copy(&mut reader, &mut file).await?;
    file.flush().await?;
    Ok(bytes)
}

/// Upload a staged local file under the given key; returns its size.
pub(crate) async fn upload_from(
    storage: &dyn StorageAdapter,
    key: &str,
    path: &Path,
) -> Result<u64, PerformError> {
    let file = tokio::fs::File::open(path).await?;
    let length = file.metadata().await?.len();
    storage
        .upload(key, Box::new(file), length, Some("application/octet-stream"))
        .await?;
    Ok(length)
}
