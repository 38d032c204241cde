//! Verify the stored artifact against its recorded checksum.

use crate::executor::{PerformError, StepContext, StepPerformer};
use crate::messages::StepCommand;
use crate::ports::{ArtifactRepository, StorageFactory};
use aldatu_domain::StepKind;
use std::sync::Arc;
use tracing::info;

pub struct VerifyPerformer {
    storage: Arc<dyn StorageFactory>,
    artifacts: Arc<dyn ArtifactRepository>,
}

impl VerifyPerformer {
    pub fn new(storage: Arc<dyn StorageFactory>, artifacts: Arc<dyn ArtifactRepository>) -> Self {
        Self { storage, artifacts }
    }
}

#[async_trait::async_trait]
impl StepPerformer for VerifyPerformer {
    fn kind(&self) -> StepKind {
        StepKind::Verify
    }

    async fn perform(&self, ctx: &StepContext, command: &StepCommand) -> Result<(), PerformError> {
        let StepCommand::Verify { artifact_id, .. } = command else {
            return Err(PerformError::Failed(format!(
                "wrong payload for Verify: {:?}",
                command.kind()
            )));
        };

        if !ctx.job.options.verify_checksum {
            info!(job_id = %ctx.job.id, "checksum verification disabled for this job");
            ctx.progress.report(100).await;
            return Ok(());
        }

        let artifact = match artifact_id {
            Some(id) => self.artifacts.get(*id).await?,
            None => self
                .artifacts
                .list_by_job(ctx.job.id)
                .await?
                .into_iter()
                .max_by_key(|a| a.created_at),
        };
        let Some(artifact) = artifact else {
            return Err(PerformError::Failed(format!(
                "no artifact recorded for job {}",
                ctx.job.id
            )));
        };
        ctx.progress.report(25).await;

        let storage = self.storage.create(&ctx.job.storage_target)?;
        let actual = storage.checksum(&artifact.storage_key).await?;
        ctx.progress.report(75).await;

        // hex digests compare case-insensitively
        if !artifact.checksum.matches(&actual) {
            return Err(PerformError::Failed(format!(
                "Checksum mismatch: expected {}, got {}",
                artifact.checksum.value, actual
            )));
        }

        info!(job_id = %ctx.job.id, artifact_id = %artifact.id, "artifact verified");
        ctx.progress.report(100).await;
        Ok(())
    }
}
