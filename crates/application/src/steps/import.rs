//! Create the target VM and import the artifact disk into it.

use crate::executor::{PerformError, StepContext, StepPerformer};
use crate::messages::StepCommand;
use crate::ports::TargetHypervisor;
use aldatu_domain::StepKind;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub struct ImportToPvePerformer {
    target: Arc<dyn TargetHypervisor>,
}

impl ImportToPvePerformer {
    pub fn new(target: Arc<dyn TargetHypervisor>) -> Self {
        Self { target }
    }
}

#[async_trait::async_trait]
impl StepPerformer for ImportToPvePerformer {
    fn kind(&self) -> StepKind {
        StepKind::ImportToPve
    }

    async fn perform(&self, ctx: &StepContext, command: &StepCommand) -> Result<(), PerformError> {
        let StepCommand::ImportToPve {
            target_connection_id,
            storage_key,
            disk_format,
            vm_name,
            cores,
            memory_mb,
            ..
        } = command
        else {
            return Err(PerformError::Failed(format!(
                "wrong payload for ImportToPve: {:?}",
                command.kind()
            )));
        };

        // create 0-30, import 30-100
        let vm_id = self
            .target
            .create_vm(*target_connection_id, vm_name, *cores, *memory_mb)
            .await?;
        info!(job_id = %ctx.job.id, vm_id, "target VM created");
        ctx.progress.report(30).await;

        if ctx.cancel.is_cancelled() {
            return Err(PerformError::Cancelled);
        }

        self.target
            .import_disk(
                *target_connection_id,
                vm_id,
                storage_key,
                *disk_format,
                &ctx.progress.scaled(30, 100),
                &ctx.cancel,
            )
            .await?;

        let mut settings = HashMap::new();
        settings.insert("onboot".to_string(), "1".to_string());
        settings.insert(
            "description".to_string(),
            format!("migrated from {}", ctx.job.source_vm.vm_id),
        );
        self.target
            .configure_vm(*target_connection_id, vm_id, settings)
            .await?;

        ctx.progress.report(100).await;
        Ok(())
    }
}
