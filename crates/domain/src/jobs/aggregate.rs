// MigrationJob aggregate - owns the step collection and the job lifecycle

use crate::artifacts::DiskFormat;
use crate::events::JobEvent;
use crate::jobs::JobStep;
use crate::shared_kernel::{
    ConnectionId, CorrelationId, DomainError, JobId, JobStatus, Result, StepId,
};
use crate::storage::StorageTarget;
use crate::strategy::MigrationStrategy;
use crate::vm::VmSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-job execution options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationOptions {
    pub target_disk_format: DiskFormat,
    pub delete_source_after: bool,
    pub verify_checksum: bool,
    pub max_retries: u32,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            target_disk_format: DiskFormat::Qcow2,
            delete_source_after: false,
            verify_checksum: true,
            max_retries: 2,
        }
    }
}

/// Aggregate root for one VM migration. Steps live inside the same
/// consistency boundary and are persisted together with the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationJob {
    pub id: JobId,
    pub correlation_id: CorrelationId,
    pub source_connection_id: ConnectionId,
    pub target_connection_id: ConnectionId,
    pub source_vm: VmSpec,
    pub storage_target: StorageTarget,
    pub strategy: MigrationStrategy,
    pub options: MigrationOptions,
    pub status: JobStatus,
    pub progress: u8,
    pub result: Option<String>,
    steps: Vec<JobStep>,
    #[serde(skip)]
    pending_events: Vec<JobEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MigrationJob {
    pub fn new(
        source_connection_id: ConnectionId,
        target_connection_id: ConnectionId,
        source_vm: VmSpec,
        storage_target: StorageTarget,
        strategy: MigrationStrategy,
        options: MigrationOptions,
    ) -> Self {
        let id = JobId::new();
        let correlation_id = CorrelationId::new();
        let now = Utc::now();

        let mut job = Self {
            id,
            correlation_id,
            source_connection_id,
            target_connection_id,
            source_vm,
            storage_target,
            strategy,
            options,
            status: JobStatus::Created,
            progress: 0,
            result: None,
            steps: Vec::new(),
            pending_events: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        job.pending_events.push(JobEvent::Created {
            job_id: id,
            correlation_id,
            occurred_at: now,
        });
        job
    }

    /// Build a job and attach the strategy's step plan in order.
    pub fn with_planned_steps(
        source_connection_id: ConnectionId,
        target_connection_id: ConnectionId,
        source_vm: VmSpec,
        storage_target: StorageTarget,
        strategy: MigrationStrategy,
        options: MigrationOptions,
    ) -> Self {
        let mut job = Self::new(
            source_connection_id,
            target_connection_id,
            source_vm,
            storage_target,
            strategy,
            options,
        );
        for (order, name) in strategy.step_names().iter().enumerate() {
            job.add_step(*name, order as u32);
        }
        job
    }

    pub fn steps(&self) -> &[JobStep] {
        &self.steps
    }

    pub fn step_by_id(&self, step_id: StepId) -> Option<&JobStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn step_by_id_mut(&mut self, step_id: StepId) -> Option<&mut JobStep> {
        self.steps.iter_mut().find(|s| s.id == step_id)
    }

    pub fn step_at(&self, index: usize) -> Option<&JobStep> {
        self.steps.iter().find(|s| s.order as usize == index)
    }

    /// Append a step to the plan with the job's retry budget.
    pub fn add_step(&mut self, name: impl Into<String>, order: u32) -> StepId {
        let step = JobStep::new(self.id, name, order, self.options.max_retries);
        let id = step.id;
        self.steps.push(step);
        self.updated_at = Utc::now();
        id
    }

    pub fn enqueue(&mut self) -> Result<()> {
        self.transition(JobStatus::Created, JobStatus::Queued)
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(JobStatus::Queued, JobStatus::Running)
    }

    pub fn request_pause(&mut self) -> Result<()> {
        self.transition(JobStatus::Running, JobStatus::Pausing)
    }

    pub fn pause(&mut self) -> Result<()> {
        self.transition(JobStatus::Pausing, JobStatus::Paused)
    }

    pub fn request_resume(&mut self) -> Result<()> {
        self.transition(JobStatus::Paused, JobStatus::Resuming)
    }

    pub fn resume(&mut self) -> Result<()> {
        self.transition(JobStatus::Resuming, JobStatus::Running)
    }

    /// Cancellation can be requested while queued, running or during a
    /// pause cycle.
    pub fn request_cancel(&mut self) -> Result<()> {
        match self.status {
            JobStatus::Running | JobStatus::Pausing | JobStatus::Paused | JobStatus::Queued => {
                self.transition(self.status, JobStatus::Cancelling)
            }
            from => Err(DomainError::InvalidTransition {
                from,
                to: JobStatus::Cancelling,
            }),
        }
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.transition(JobStatus::Cancelling, JobStatus::Cancelled)
    }

    /// Terminal failure; stores the reason on the job.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        match self.status {
            JobStatus::Running | JobStatus::Resuming => {
                self.result = Some(reason.into());
                self.transition(self.status, JobStatus::Failed)
            }
            from => Err(DomainError::InvalidTransition {
                from,
                to: JobStatus::Failed,
            }),
        }
    }

    /// Terminal success. Only valid while running and only once every
    /// step has settled.
    pub fn complete(&mut self) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to: JobStatus::Succeeded,
            });
        }

        if !self.steps.iter().all(|s| s.status.is_settled()) {
            return Err(DomainError::IncompleteSteps);
        }

        self.transition(JobStatus::Running, JobStatus::Succeeded)
    }

    /// Recompute overall progress as the mean of step progress values.
    /// Does not transition status.
    pub fn update_progress(&mut self) {
        if self.steps.is_empty() {
            self.progress = 0;
            return;
        }
        let total: u32 = self.steps.iter().map(|s| s.progress as u32).sum();
        self.progress = (total / self.steps.len() as u32) as u8;
        self.updated_at = Utc::now();
    }

    /// Hand pending events to the caller. Call after a successful
    /// persist; publishing before persisting would announce state that
    /// may never be stored.
    pub fn drain_events(&mut self) -> Vec<JobEvent> {
        std::mem::take(&mut self.pending_events)
    }

    fn transition(&mut self, required: JobStatus, next: JobStatus) -> Result<()> {
        if self.status != required {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let old = self.status;
        self.status = next;
        self.updated_at = Utc::now();
        self.pending_events.push(JobEvent::StatusChanged {
            job_id: self.id,
            old_status: old,
            new_status: next,
            occurred_at: self.updated_at,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_kernel::StepStatus;

    fn full_copy_job() -> MigrationJob {
        MigrationJob::with_planned_steps(
            ConnectionId::new(),
            ConnectionId::new(),
            VmSpec::new("vm-101", "web-server-01", "disk-0", 4, 8192),
            StorageTarget::local("/tmp/aldatu-test"),
            MigrationStrategy::FullCopy,
            MigrationOptions::default(),
        )
    }

    #[test]
    fn new_job_starts_created_with_planned_steps() {
        let job = full_copy_job();
        assert_eq!(job.status, JobStatus::Created);
        assert_eq!(job.steps().len(), 5);
        assert_eq!(job.steps()[0].name, "ExportVmdk");
        assert_eq!(job.steps()[4].name, "Verify");
        assert!(job.steps().iter().all(|s| s.status == StepStatus::Pending));
    }

    #[test]
    fn happy_path_lifecycle() {
        let mut job = full_copy_job();
        job.enqueue().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        job.start().unwrap();
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn enqueue_twice_is_rejected() {
        let mut job = full_copy_job();
        job.enqueue().unwrap();
        let err = job.enqueue().unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidTransition {
                from: JobStatus::Queued,
                to: JobStatus::Queued
            }
        );
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn pause_resume_cycle() {
        let mut job = full_copy_job();
        job.enqueue().unwrap();
        job.start().unwrap();
        job.request_pause().unwrap();
        assert_eq!(job.status, JobStatus::Pausing);
        job.pause().unwrap();
        assert_eq!(job.status, JobStatus::Paused);
        job.request_resume().unwrap();
        job.resume().unwrap();
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn cancel_allowed_from_queued_running_pausing_paused() {
        for setup in [
            (&|j: &mut MigrationJob| {
                j.enqueue().unwrap();
            }) as &dyn Fn(&mut MigrationJob),
            &|j: &mut MigrationJob| {
                j.enqueue().unwrap();
                j.start().unwrap();
            },
            &|j: &mut MigrationJob| {
                j.enqueue().unwrap();
                j.start().unwrap();
                j.request_pause().unwrap();
            },
            &|j: &mut MigrationJob| {
                j.enqueue().unwrap();
                j.start().unwrap();
                j.request_pause().unwrap();
                j.pause().unwrap();
            },
        ] {
            let mut job = full_copy_job();
            setup(&mut job);
            job.request_cancel().unwrap();
            assert_eq!(job.status, JobStatus::Cancelling);
            job.cancel().unwrap();
            assert_eq!(job.status, JobStatus::Cancelled);
        }
    }

    #[test]
    fn cancel_rejected_from_created() {
        let mut job = full_copy_job();
        assert!(job.request_cancel().is_err());
        assert_eq!(job.status, JobStatus::Created);
    }

    #[test]
    fn fail_stores_reason() {
        let mut job = full_copy_job();
        job.enqueue().unwrap();
        job.start().unwrap();
        job.fail("export timed out").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.result.as_deref(), Some("export timed out"));
    }

    #[test]
    fn complete_requires_all_steps_settled() {
        let mut job = full_copy_job();
        job.enqueue().unwrap();
        job.start().unwrap();

        // Scenario A: no step has succeeded yet
        let err = job.complete().unwrap_err();
        assert_eq!(err, DomainError::IncompleteSteps);
        assert_eq!(job.status, JobStatus::Running);

        let step_ids: Vec<_> = job.steps().iter().map(|s| s.id).collect();
        for id in &step_ids[..4] {
            let step = job.step_by_id_mut(*id).unwrap();
            step.start().unwrap();
            step.complete().unwrap();
        }
        // one skipped step still counts as settled
        job.step_by_id_mut(step_ids[4]).unwrap().skip().unwrap();

        job.complete().unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
    }

    #[test]
    fn complete_requires_running() {
        let mut job = full_copy_job();
        let err = job.complete().unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn progress_is_mean_of_steps() {
        let mut job = full_copy_job();
        job.enqueue().unwrap();
        job.start().unwrap();
        let first = job.steps()[0].id;
        let step = job.step_by_id_mut(first).unwrap();
        step.start().unwrap();
        step.update_progress(50).unwrap();
        job.update_progress();
        assert_eq!(job.progress, 10); // 50 / 5 steps

        for id in job.steps().iter().map(|s| s.id).collect::<Vec<_>>() {
            let step = job.step_by_id_mut(id).unwrap();
            if step.status == StepStatus::Pending {
                step.start().unwrap();
            }
            step.complete().unwrap();
        }
        job.update_progress();
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn progress_without_steps_is_zero() {
        let mut job = MigrationJob::new(
            ConnectionId::new(),
            ConnectionId::new(),
            VmSpec::new("vm-101", "web-server-01", "disk-0", 4, 8192),
            StorageTarget::local("/tmp"),
            MigrationStrategy::FullCopy,
            MigrationOptions::default(),
        );
        job.update_progress();
        assert_eq!(job.progress, 0);
    }

    #[test]
    fn transitions_accumulate_events_until_drained() {
        let mut job = full_copy_job();
        job.enqueue().unwrap();
        job.start().unwrap();

        let events = job.drain_events();
        // Created + two status changes
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], JobEvent::Created { .. }));
        assert!(matches!(
            events[2],
            JobEvent::StatusChanged {
                old_status: JobStatus::Queued,
                new_status: JobStatus::Running,
                ..
            }
        ));
        assert!(job.drain_events().is_empty());
    }

    #[test]
    fn failed_guard_leaves_state_and_events_untouched() {
        let mut job = full_copy_job();
        job.drain_events();
        assert!(job.start().is_err());
        assert_eq!(job.status, JobStatus::Created);
        assert!(job.drain_events().is_empty());
    }
}
