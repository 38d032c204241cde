// Domain events raised by aggregate transitions.
//
// Events are collected on the aggregate as a side-channel list and
// drained by the caller after a successful persist; a failed persist
// drops them together with the aggregate copy that produced them.

use crate::shared_kernel::{ArtifactId, CorrelationId, JobId, JobStatus, StepId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Facts recorded by the MigrationJob aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobEvent {
    /// A new job was created with its step plan
    Created {
        job_id: JobId,
        correlation_id: CorrelationId,
        occurred_at: DateTime<Utc>,
    },
    /// The job moved between lifecycle states
    StatusChanged {
        job_id: JobId,
        old_status: JobStatus,
        new_status: JobStatus,
        occurred_at: DateTime<Utc>,
    },
    /// The upload stage produced an artifact
    ArtifactRecorded {
        job_id: JobId,
        artifact_id: ArtifactId,
        step_id: StepId,
        occurred_at: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Created { job_id, .. }
            | JobEvent::StatusChanged { job_id, .. }
            | JobEvent::ArtifactRecorded { job_id, .. } => *job_id,
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            JobEvent::Created { occurred_at, .. }
            | JobEvent::StatusChanged { occurred_at, .. }
            | JobEvent::ArtifactRecorded { occurred_at, .. } => *occurred_at,
        }
    }
}
