//! Bus message types: step-dispatch commands and pipeline lifecycle
//! events, all correlated by the job's correlation id.

use aldatu_domain::{
    ArtifactId, ConnectionId, CorrelationId, DiskFormat, JobId, StepId, StepKind,
};
use serde::{Deserialize, Serialize};

/// Common addressing header carried by every step command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRef {
    pub job_id: JobId,
    pub step_id: StepId,
    pub correlation_id: CorrelationId,
}

/// One dispatch command per step kind. The payload mirrors what the
/// step's external operation needs; everything else is loaded from the
/// job by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepCommand {
    ExportVmdk {
        meta: StepRef,
        source_connection_id: ConnectionId,
        vm_id: String,
        disk_key: String,
        output_key: String,
    },
    ConvertDisk {
        meta: StepRef,
        input_key: String,
        output_key: String,
        target_format: DiskFormat,
    },
    UploadArtifact {
        meta: StepRef,
        source_key: String,
        storage_key: String,
        format: DiskFormat,
    },
    ImportToPve {
        meta: StepRef,
        target_connection_id: ConnectionId,
        storage_key: String,
        disk_format: DiskFormat,
        vm_name: String,
        cores: u32,
        memory_mb: u32,
    },
    Verify {
        meta: StepRef,
        artifact_id: Option<ArtifactId>,
    },
    EnableCbt {
        meta: StepRef,
        source_connection_id: ConnectionId,
        vm_id: String,
    },
    IncrementalPull {
        meta: StepRef,
        source_connection_id: ConnectionId,
        vm_id: String,
        change_id: String,
        base_storage_key: String,
    },
    ApplyDelta {
        meta: StepRef,
        delta_key: String,
        target_key: String,
        target_format: DiskFormat,
    },
    FinalSyncCutover {
        meta: StepRef,
        source_connection_id: ConnectionId,
        target_connection_id: ConnectionId,
        vm_id: String,
        vm_name: String,
        cores: u32,
        memory_mb: u32,
        storage_key: String,
        disk_format: DiskFormat,
    },
}

impl StepCommand {
    pub fn meta(&self) -> StepRef {
        match self {
            StepCommand::ExportVmdk { meta, .. }
            | StepCommand::ConvertDisk { meta, .. }
            | StepCommand::UploadArtifact { meta, .. }
            | StepCommand::ImportToPve { meta, .. }
            | StepCommand::Verify { meta, .. }
            | StepCommand::EnableCbt { meta, .. }
            | StepCommand::IncrementalPull { meta, .. }
            | StepCommand::ApplyDelta { meta, .. }
            | StepCommand::FinalSyncCutover { meta, .. } => *meta,
        }
    }

    pub fn kind(&self) -> StepKind {
        match self {
            StepCommand::ExportVmdk { .. } => StepKind::ExportVmdk,
            StepCommand::ConvertDisk { .. } => StepKind::ConvertDisk,
            StepCommand::UploadArtifact { .. } => StepKind::UploadArtifact,
            StepCommand::ImportToPve { .. } => StepKind::ImportToPve,
            StepCommand::Verify { .. } => StepKind::Verify,
            StepCommand::EnableCbt { .. } => StepKind::EnableCbt,
            StepCommand::IncrementalPull { .. } => StepKind::IncrementalPull,
            StepCommand::ApplyDelta { .. } => StepKind::ApplyDelta,
            StepCommand::FinalSyncCutover { .. } => StepKind::FinalSyncCutover,
        }
    }
}

/// Lifecycle events consumed by the saga coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// The job was enqueued and its pipeline should begin.
    JobStarted {
        job_id: JobId,
        correlation_id: CorrelationId,
        step_names: Vec<String>,
    },
    /// A step finished successfully.
    StepCompleted {
        job_id: JobId,
        step_id: StepId,
        step_name: String,
        correlation_id: CorrelationId,
    },
    /// A step failed. `will_retry` reports whether the executor left it
    /// in `Retrying` (budget remained) or `Failed` (terminal).
    StepFailed {
        job_id: JobId,
        step_id: StepId,
        step_name: String,
        error: String,
        will_retry: bool,
        correlation_id: CorrelationId,
    },
    /// A user asked for the job to be cancelled.
    JobCancelRequested {
        job_id: JobId,
        correlation_id: CorrelationId,
    },
    /// A paused job was resumed.
    JobResumed {
        job_id: JobId,
        correlation_id: CorrelationId,
    },
}

impl PipelineEvent {
    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            PipelineEvent::JobStarted { correlation_id, .. }
            | PipelineEvent::StepCompleted { correlation_id, .. }
            | PipelineEvent::StepFailed { correlation_id, .. }
            | PipelineEvent::JobCancelRequested { correlation_id, .. }
            | PipelineEvent::JobResumed { correlation_id, .. } => *correlation_id,
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            PipelineEvent::JobStarted { job_id, .. }
            | PipelineEvent::StepCompleted { job_id, .. }
            | PipelineEvent::StepFailed { job_id, .. }
            | PipelineEvent::JobCancelRequested { job_id, .. }
            | PipelineEvent::JobResumed { job_id, .. } => *job_id,
        }
    }
}
