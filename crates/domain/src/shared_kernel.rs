// Shared kernel - base ids, statuses and errors shared across bounded contexts

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for migration jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for job steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub Uuid);

impl StepId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for migration artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId(pub Uuid);

impl ArtifactId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a stored hypervisor connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation identifier shared by every message and event of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle states of a migration job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Job created, steps attached, not yet queued
    Created,
    /// Job accepted for execution
    Queued,
    /// Pipeline in progress
    Running,
    /// Pause requested, waiting for the in-flight step to finish
    Pausing,
    /// Pipeline held between steps
    Paused,
    /// Resume requested
    Resuming,
    /// Cancel requested, waiting for the in-flight step to stop
    Cancelling,
    /// Job cancelled by the user
    Cancelled,
    /// A step failed terminally
    Failed,
    /// Every step succeeded or was skipped
    Succeeded,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Created => write!(f, "CREATED"),
            JobStatus::Queued => write!(f, "QUEUED"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Pausing => write!(f, "PAUSING"),
            JobStatus::Paused => write!(f, "PAUSED"),
            JobStatus::Resuming => write!(f, "RESUMING"),
            JobStatus::Cancelling => write!(f, "CANCELLING"),
            JobStatus::Cancelled => write!(f, "CANCELLED"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::Succeeded => write!(f, "SUCCEEDED"),
        }
    }
}

impl JobStatus {
    /// Whether the job can still make progress
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Lifecycle states of a single pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    /// Not yet dispatched
    Pending,
    /// Executor is performing the external operation
    Running,
    /// Failed with retry budget remaining, waiting for redispatch
    Retrying,
    /// Failed with no retry budget left
    Failed,
    /// Intentionally not executed
    Skipped,
    /// Completed successfully
    Succeeded,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "PENDING"),
            StepStatus::Running => write!(f, "RUNNING"),
            StepStatus::Retrying => write!(f, "RETRYING"),
            StepStatus::Failed => write!(f, "FAILED"),
            StepStatus::Skipped => write!(f, "SKIPPED"),
            StepStatus::Succeeded => write!(f, "SUCCEEDED"),
        }
    }
}

impl StepStatus {
    /// Whether the step counts as done for job completion
    pub fn is_settled(&self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Skipped)
    }
}

/// Domain errors
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("Cannot transition job from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Cannot transition step '{step}' from {from} to {to}")]
    InvalidStepTransition {
        step: String,
        from: StepStatus,
        to: StepStatus,
    },

    #[error("Step '{step}' has exhausted its retries ({max_retries})")]
    RetriesExhausted { step: String, max_retries: u32 },

    #[error("Cannot complete job: not all steps have succeeded")]
    IncompleteSteps,

    #[error("Cannot update progress for step '{step}' in status {status}")]
    ProgressNotUpdatable { step: String, status: StepStatus },

    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: JobId },

    #[error("Step {step_id} not found in job {job_id}")]
    StepNotFound { job_id: JobId, step_id: StepId },

    #[error("Artifact not found: {artifact_id}")]
    ArtifactNotFound { artifact_id: ArtifactId },
}

pub type Result<T> = std::result::Result<T, DomainError>;
