//! Convert the staged export into the target disk format.

use crate::executor::{PerformError, StepContext, StepPerformer};
use crate::messages::StepCommand;
use crate::ports::{DiskConverter, StorageFactory};
use crate::steps::{download_to, upload_from};
use aldatu_domain::StepKind;
use std::sync::Arc;
use tracing::debug;

pub struct ConvertDiskPerformer {
    storage: Arc<dyn StorageFactory>,
    converter: Arc<dyn DiskConverter>,
}

impl ConvertDiskPerformer {
    pub fn new(storage: Arc<dyn StorageFactory>, converter: Arc<dyn DiskConverter>) -> Self {
        Self { storage, converter }
    }
}

#[async_trait::async_trait]
impl StepPerformer for ConvertDiskPerformer {
    fn kind(&self) -> StepKind {
        StepKind::ConvertDisk
    }

    async fn perform(&self, ctx: &StepContext, command: &StepCommand) -> Result<(), PerformError> {
        let StepCommand::ConvertDisk {
            input_key,
            output_key,
            target_format,
            ..
        } = command
        else {
            return Err(PerformError::Failed(format!(
                "wrong payload for ConvertDisk: {:?}",
                command.kind()
            )));
        };

        let storage = self.storage.create(&ctx.job.storage_target)?;
        let input = ctx.scratch_dir.join("input.img");
        let output = ctx.scratch_dir.join(format!("output.{target_format}"));

        // download 0-30, convert 30-80, upload 80-100
        let bytes = download_to(storage.as_ref(), input_key, &input).await?;
        ctx.progress.report(30).await;
        debug!(job_id = %ctx.job.id, bytes, "input staged for conversion");

        if ctx.cancel.is_cancelled() {
            return Err(PerformError::Cancelled);
        }

        self.converter
            .convert(
                &input,
                &output,
                *target_format,
                &ctx.progress.scaled(30, 80),
                &ctx.cancel,
            )
            .await?;

        upload_from(storage.as_ref(), output_key, &output).await?;
        ctx.progress.report(100).await;
        Ok(())
    }
}
