//! Export the source disk and stage it in object storage.

use crate::executor::{PerformError, StepContext, StepPerformer};
use crate::messages::StepCommand;
use crate::ports::{SourceHypervisor, StorageFactory};
use crate::steps::upload_from;
use aldatu_domain::StepKind;
use std::sync::Arc;
use tracing::debug;

pub struct ExportVmdkPerformer {
    source: Arc<dyn SourceHypervisor>,
    storage: Arc<dyn StorageFactory>,
}

impl ExportVmdkPerformer {
    pub fn new(source: Arc<dyn SourceHypervisor>, storage: Arc<dyn StorageFactory>) -> Self {
        Self { source, storage }
    }
}

#[async_trait::async_trait]
impl StepPerformer for ExportVmdkPerformer {
    fn kind(&self) -> StepKind {
        StepKind::ExportVmdk
    }

    async fn perform(&self, ctx: &StepContext, command: &StepCommand) -> Result<(), PerformError> {
        let StepCommand::ExportVmdk {
            source_connection_id,
            vm_id,
            disk_key,
            output_key,
            ..
        } = command
        else {
            return Err(PerformError::Failed(format!(
                "wrong payload for ExportVmdk: {:?}",
                command.kind()
            )));
        };

        let staged = ctx.scratch_dir.join("export.vmdk");

        // hypervisor transfer owns the 0-70 band, the upload the rest
        let bytes = self
            .source
            .export_disk(
                *source_connection_id,
                vm_id,
                disk_key,
                &staged,
                &ctx.progress.scaled(0, 70),
                &ctx.cancel,
            )
            .await?;
        debug!(job_id = %ctx.job.id, bytes, "disk exported");

        if ctx.cancel.is_cancelled() {
            return Err(PerformError::Cancelled);
        }

        let storage = self.storage.create(&ctx.job.storage_target)?;
        upload_from(storage.as_ref(), output_key, &staged).await?;
        ctx.progress.report(100).await;
        Ok(())
    }
}
