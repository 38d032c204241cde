//! Performers for the incremental (change-block-tracked) pipeline:
//! enable tracking, pull deltas, fold them into the base image and run
//! the final sync plus cutover to the target hypervisor.

use crate::executor::{PerformError, StepContext, StepPerformer};
use crate::keys;
use crate::messages::StepCommand;
use crate::ports::{
    ArtifactRepository, SourceHypervisor, StorageAdapter, StorageError, StorageFactory,
    TargetHypervisor,
};
use crate::steps::{download_to, upload_from};
use aldatu_domain::{Artifact, Checksum, StepKind};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Make sure change tracking is active on the source VM.
pub struct EnableCbtPerformer {
    source: Arc<dyn SourceHypervisor>,
}

impl EnableCbtPerformer {
    pub fn new(source: Arc<dyn SourceHypervisor>) -> Self {
        Self { source }
    }
}

#[async_trait::async_trait]
impl StepPerformer for EnableCbtPerformer {
    fn kind(&self) -> StepKind {
        StepKind::EnableCbt
    }

    async fn perform(&self, ctx: &StepContext, command: &StepCommand) -> Result<(), PerformError> {
        let StepCommand::EnableCbt {
            source_connection_id,
            vm_id,
            ..
        } = command
        else {
            return Err(PerformError::Failed(format!(
                "wrong payload for EnableCbt: {:?}",
                command.kind()
            )));
        };

        let enabled = self
            .source
            .is_cbt_enabled(*source_connection_id, vm_id)
            .await?;
        ctx.progress.report(50).await;

        if enabled {
            info!(job_id = %ctx.job.id, vm_id, "change tracking already enabled");
        } else {
            self.source.enable_cbt(*source_connection_id, vm_id).await?;
            info!(job_id = %ctx.job.id, vm_id, "change tracking enabled");
        }

        ctx.progress.report(100).await;
        Ok(())
    }
}

/// Pull the blocks changed since the recorded change id and stage them
/// as a delta object.
pub struct IncrementalPullPerformer {
    source: Arc<dyn SourceHypervisor>,
    storage: Arc<dyn StorageFactory>,
}

impl IncrementalPullPerformer {
    pub fn new(source: Arc<dyn SourceHypervisor>, storage: Arc<dyn StorageFactory>) -> Self {
        Self { source, storage }
    }
}

#[async_trait::async_trait]
impl StepPerformer for IncrementalPullPerformer {
    fn kind(&self) -> StepKind {
        StepKind::IncrementalPull
    }

    async fn perform(&self, ctx: &StepContext, command: &StepCommand) -> Result<(), PerformError> {
        let StepCommand::IncrementalPull {
            source_connection_id,
            vm_id,
            change_id,
            ..
        } = command
        else {
            return Err(PerformError::Failed(format!(
                "wrong payload for IncrementalPull: {:?}",
                command.kind()
            )));
        };

        let staged = ctx.scratch_dir.join("delta.bin");

        // pull 0-60, stage 60-100
        let bytes = self
            .source
            .pull_changed_blocks(
                *source_connection_id,
                vm_id,
                change_id,
                &staged,
                &ctx.progress.scaled(0, 60),
                &ctx.cancel,
            )
            .await?;
        debug!(job_id = %ctx.job.id, change_id, bytes, "delta pulled");

        if ctx.cancel.is_cancelled() {
            return Err(PerformError::Cancelled);
        }

        let storage = self.storage.create(&ctx.job.storage_target)?;
        let delta_key = keys::delta_key(ctx.job.id, change_id);
        upload_from(storage.as_ref(), &delta_key, &staged).await?;
        ctx.progress.report(100).await;
        Ok(())
    }
}

/// Fold a staged delta into the base image and record the result as the
/// job's artifact.
pub struct ApplyDeltaPerformer {
    storage: Arc<dyn StorageFactory>,
    artifacts: Arc<dyn ArtifactRepository>,
}

impl ApplyDeltaPerformer {
    pub fn new(storage: Arc<dyn StorageFactory>, artifacts: Arc<dyn ArtifactRepository>) -> Self {
        Self { storage, artifacts }
    }
}

#[async_trait::async_trait]
impl StepPerformer for ApplyDeltaPerformer {
    fn kind(&self) -> StepKind {
        StepKind::ApplyDelta
    }

    async fn perform(&self, ctx: &StepContext, command: &StepCommand) -> Result<(), PerformError> {
        let StepCommand::ApplyDelta {
            delta_key,
            target_key,
            target_format,
            ..
        } = command
        else {
            return Err(PerformError::Failed(format!(
                "wrong payload for ApplyDelta: {:?}",
                command.kind()
            )));
        };

        let storage = self.storage.create(&ctx.job.storage_target)?;
        let merged = ctx.scratch_dir.join("merged.img");

        // base 0-30, delta 30-50, merge 50-60, publish 60-85, record 85-100
        let size_bytes =
            apply_delta(storage.as_ref(), target_key, delta_key, &merged, ctx).await?;
        ctx.progress.report(60).await;

        if ctx.cancel.is_cancelled() {
            return Err(PerformError::Cancelled);
        }

        upload_from(storage.as_ref(), target_key, &merged).await?;
        ctx.progress.report(85).await;

        let checksum_value = storage.checksum(target_key).await?;
        let file_name = target_key
            .rsplit('/')
            .next()
            .unwrap_or(target_key)
            .to_string();
        let artifact = Artifact::new(
            ctx.job.id,
            file_name,
            *target_format,
            Checksum::sha256(checksum_value),
            size_bytes,
            target_key.clone(),
        );
        info!(job_id = %ctx.job.id, artifact_id = %artifact.id, "synchronised image recorded");
        self.artifacts.add(&artifact).await?;

        ctx.progress.report(100).await;
        Ok(())
    }
}

/// Pull and apply the last delta, then create and configure the target
/// VM with the synchronised disk.
pub struct FinalSyncCutoverPerformer {
    source: Arc<dyn SourceHypervisor>,
    target: Arc<dyn TargetHypervisor>,
    storage: Arc<dyn StorageFactory>,
    artifacts: Arc<dyn ArtifactRepository>,
}

impl FinalSyncCutoverPerformer {
    pub fn new(
        source: Arc<dyn SourceHypervisor>,
        target: Arc<dyn TargetHypervisor>,
        storage: Arc<dyn StorageFactory>,
        artifacts: Arc<dyn ArtifactRepository>,
    ) -> Self {
        Self {
            source,
            target,
            storage,
            artifacts,
        }
    }
}

#[async_trait::async_trait]
impl StepPerformer for FinalSyncCutoverPerformer {
    fn kind(&self) -> StepKind {
        StepKind::FinalSyncCutover
    }

    async fn perform(&self, ctx: &StepContext, command: &StepCommand) -> Result<(), PerformError> {
        let StepCommand::FinalSyncCutover {
            source_connection_id,
            target_connection_id,
            vm_id,
            vm_name,
            cores,
            memory_mb,
            storage_key,
            disk_format,
            ..
        } = command
        else {
            return Err(PerformError::Failed(format!(
                "wrong payload for FinalSyncCutover: {:?}",
                command.kind()
            )));
        };

        let storage = self.storage.create(&ctx.job.storage_target)?;

        // final delta 0-30, merge+publish 30-55, create 55-65, import 65-95, configure 95-100
        let final_delta = ctx.scratch_dir.join("final-delta.bin");
        self.source
            .pull_changed_blocks(
                *source_connection_id,
                vm_id,
                "latest",
                &final_delta,
                &ctx.progress.scaled(0, 30),
                &ctx.cancel,
            )
            .await?;

        let merged = ctx.scratch_dir.join("final.img");
        let size_bytes = merge_files(storage.as_ref(), storage_key, &final_delta, &merged).await?;
        upload_from(storage.as_ref(), storage_key, &merged).await?;
        ctx.progress.report(50).await;

        // the final image supersedes the one ApplyDelta recorded; the
        // verify step checks the newest artifact
        let checksum_value = storage.checksum(storage_key).await?;
        let file_name = storage_key
            .rsplit('/')
            .next()
            .unwrap_or(storage_key)
            .to_string();
        let artifact = Artifact::new(
            ctx.job.id,
            file_name,
            *disk_format,
            Checksum::sha256(checksum_value),
            size_bytes,
            storage_key.clone(),
        );
        self.artifacts.add(&artifact).await?;
        ctx.progress.report(55).await;

        if ctx.cancel.is_cancelled() {
            return Err(PerformError::Cancelled);
        }

        let target_vm_id = self
            .target
            .create_vm(*target_connection_id, vm_name, *cores, *memory_mb)
            .await?;
        info!(job_id = %ctx.job.id, target_vm_id, "cutover VM created");
        ctx.progress.report(65).await;

        self.target
            .import_disk(
                *target_connection_id,
                target_vm_id,
                storage_key,
                *disk_format,
                &ctx.progress.scaled(65, 95),
                &ctx.cancel,
            )
            .await?;

        let mut settings = HashMap::new();
        settings.insert("onboot".to_string(), "1".to_string());
        settings.insert(
            "description".to_string(),
            format!("migrated incrementally from {vm_id}"),
        );
        self.target
            .configure_vm(*target_connection_id, target_vm_id, settings)
            .await?;

        ctx.progress.report(100).await;
        Ok(())
    }
}

/// Stage base and delta and write the merged image; returns its size.
/// Delta blocks overlay the base from offset zero; a missing base means
/// the delta is the full image (initial "*" sync).
async fn apply_delta(
    storage: &dyn StorageAdapter,
    base_key: &str,
    delta_key: &str,
    merged: &Path,
    ctx: &StepContext,
) -> Result<u64, PerformError> {
    let base = ctx.scratch_dir.join("base.img");
    let base_exists = match download_to(storage, base_key, &base).await {
        Ok(_) => true,
        Err(PerformError::Storage(StorageError::NotFound(_))) => false,
        Err(other) => return Err(other),
    };
    ctx.progress.report(30).await;

    let delta = ctx.scratch_dir.join("delta.bin");
    download_to(storage, delta_key, &delta).await?;
    ctx.progress.report(50).await;

    let delta_bytes = tokio::fs::read(&delta).await?;
    let mut image = if base_exists {
        tokio::fs::read(&base).await?
    } else {
        Vec::new()
    };

    if delta_bytes.len() >= image.len() {
        image = delta_bytes;
    } else {
        image[..delta_bytes.len()].copy_from_slice(&delta_bytes);
    }

    tokio::fs::write(merged, &image).await?;
    Ok(image.len() as u64)
}

/// Overlay a local delta file onto a stored base image.
async fn merge_files(
    storage: &dyn StorageAdapter,
    base_key: &str,
    delta_path: &Path,
    merged: &Path,
) -> Result<u64, PerformError> {
    let delta_bytes = tokio::fs::read(delta_path).await?;

    let mut image = Vec::new();
    match storage.download(base_key).await {
        Ok(mut reader) => {
            use tokio::io::AsyncReadExt;
            reader.read_to_end(&mut image).await?;
        }
        Err(StorageError::NotFound(_)) => {}
        Err(other) => return Err(other.into()),
    }

    if delta_bytes.len() >= image.len() {
        image = delta_bytes;
    } else {
        image[..delta_bytes.len()].copy_from_slice(&delta_bytes);
    }

    tokio::fs::write(merged, &image).await?;
    Ok(image.len() as u64)
}
