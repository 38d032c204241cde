// JobStep - one pipeline stage of a migration job

use crate::shared_kernel::{DomainError, JobId, Result, StepId, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Child entity of [`MigrationJob`](crate::jobs::MigrationJob); persisted
/// together with its owning job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStep {
    pub id: StepId,
    pub job_id: JobId,
    pub name: String,
    pub order: u32,
    pub status: StepStatus,
    pub progress: u8,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub logs_key: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobStep {
    pub fn new(job_id: JobId, name: impl Into<String>, order: u32, max_retries: u32) -> Self {
        Self {
            id: StepId::new(),
            job_id,
            name: name.into(),
            order,
            status: StepStatus::Pending,
            progress: 0,
            retry_count: 0,
            max_retries,
            error_message: None,
            logs_key: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Begin executing. Valid from `Pending` and `Retrying`.
    pub fn start(&mut self) -> Result<()> {
        match self.status {
            StepStatus::Pending | StepStatus::Retrying => {
                self.status = StepStatus::Running;
                self.started_at = Some(Utc::now());
                Ok(())
            }
            from => Err(DomainError::InvalidStepTransition {
                step: self.name.clone(),
                from,
                to: StepStatus::Running,
            }),
        }
    }

    /// Mark the step succeeded; forces progress to 100.
    pub fn complete(&mut self) -> Result<()> {
        match self.status {
            StepStatus::Running => {
                self.status = StepStatus::Succeeded;
                self.progress = 100;
                self.completed_at = Some(Utc::now());
                Ok(())
            }
            from => Err(DomainError::InvalidStepTransition {
                step: self.name.clone(),
                from,
                to: StepStatus::Succeeded,
            }),
        }
    }

    /// Record a failure. Valid from `Running` and `Retrying`.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        match self.status {
            StepStatus::Running | StepStatus::Retrying => {
                self.error_message = Some(error.into());
                self.status = StepStatus::Failed;
                self.completed_at = Some(Utc::now());
                Ok(())
            }
            from => Err(DomainError::InvalidStepTransition {
                step: self.name.clone(),
                from,
                to: StepStatus::Failed,
            }),
        }
    }

    /// Skip a step that has not started.
    pub fn skip(&mut self) -> Result<()> {
        match self.status {
            StepStatus::Pending => {
                self.status = StepStatus::Skipped;
                self.completed_at = Some(Utc::now());
                Ok(())
            }
            from => Err(DomainError::InvalidStepTransition {
                step: self.name.clone(),
                from,
                to: StepStatus::Skipped,
            }),
        }
    }

    /// Consume one retry. Only a `Failed` step can be retried, and never
    /// past `max_retries`.
    pub fn retry(&mut self) -> Result<()> {
        if self.status != StepStatus::Failed {
            return Err(DomainError::InvalidStepTransition {
                step: self.name.clone(),
                from: self.status,
                to: StepStatus::Retrying,
            });
        }

        if self.retry_count >= self.max_retries {
            return Err(DomainError::RetriesExhausted {
                step: self.name.clone(),
                max_retries: self.max_retries,
            });
        }

        self.retry_count += 1;
        self.status = StepStatus::Retrying;
        self.error_message = None;
        self.completed_at = None;
        Ok(())
    }

    /// Whether a failure right now would still leave retry budget.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Update progress while running; clamped to [0, 100].
    pub fn update_progress(&mut self, percent: u8) -> Result<()> {
        if self.status != StepStatus::Running {
            return Err(DomainError::ProgressNotUpdatable {
                step: self.name.clone(),
                status: self.status,
            });
        }
        self.progress = percent.min(100);
        Ok(())
    }
}
