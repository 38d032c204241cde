//! Publish the converted image as the job's artifact: copy it to its
//! final key, checksum it and record the artifact.

use crate::executor::{PerformError, StepContext, StepPerformer};
use crate::messages::StepCommand;
use crate::ports::{ArtifactRepository, StorageFactory};
use crate::steps::{download_to, upload_from};
use aldatu_domain::{Artifact, Checksum, StepKind};
use std::sync::Arc;
use tracing::info;

pub struct UploadArtifactPerformer {
    storage: Arc<dyn StorageFactory>,
    artifacts: Arc<dyn ArtifactRepository>,
}

impl UploadArtifactPerformer {
    pub fn new(storage: Arc<dyn StorageFactory>, artifacts: Arc<dyn ArtifactRepository>) -> Self {
        Self { storage, artifacts }
    }
}

#[async_trait::async_trait]
impl StepPerformer for UploadArtifactPerformer {
    fn kind(&self) -> StepKind {
        StepKind::UploadArtifact
    }

    async fn perform(&self, ctx: &StepContext, command: &StepCommand) -> Result<(), PerformError> {
        let StepCommand::UploadArtifact {
            source_key,
            storage_key,
            format,
            ..
        } = command
        else {
            return Err(PerformError::Failed(format!(
                "wrong payload for UploadArtifact: {:?}",
                command.kind()
            )));
        };

        let storage = self.storage.create(&ctx.job.storage_target)?;
        let staged = ctx.scratch_dir.join("artifact.img");

        // stage 0-40, publish 40-70, checksum 70-90, record 90-100
        let size_bytes = download_to(storage.as_ref(), source_key, &staged).await?;
        ctx.progress.report(40).await;

        if ctx.cancel.is_cancelled() {
            return Err(PerformError::Cancelled);
        }

        upload_from(storage.as_ref(), storage_key, &staged).await?;
        ctx.progress.report(70).await;

        let checksum_value = storage.checksum(storage_key).await?;
        ctx.progress.report(90).await;

        let file_name = storage_key
            .rsplit('/')
            .next()
            .unwrap_or(storage_key)
            .to_string();
        let artifact = Artifact::new(
            ctx.job.id,
            file_name,
            *format,
            Checksum::sha256(checksum_value),
            size_bytes,
            storage_key.clone(),
        );
        info!(job_id = %ctx.job.id, artifact_id = %artifact.id, checksum = %artifact.checksum, "artifact recorded");
        self.artifacts.add(&artifact).await?;

        ctx.progress.report(100).await;
        Ok(())
    }
}
