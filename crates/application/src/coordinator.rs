//! Saga coordinator: the single writer of step dispatch.
//!
//! The coordinator consumes pipeline events from the bus, applies them
//! to the per-job [`SagaState`] and acts on the resulting decision -
//! dispatching the next step command, redispatching a retrying step, or
//! finalizing the job. Step executors never dispatch work themselves;
//! they only report outcomes.

use crate::keys;
use crate::messages::{PipelineEvent, StepCommand, StepRef};
use crate::ports::{
    mutate_job, ArtifactRepository, BusError, JobRepository, MessageBus, MutateError,
    NotificationSink, StoreError,
};
use aldatu_saga::{SagaDecision, SagaRepository, SagaRepositoryError, SagaState};
use aldatu_domain::{
    DomainError, JobStatus, MigrationJob, StepKind, UnknownStepName,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Errors from coordinating a saga event.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Saga(#[from] SagaRepositoryError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    UnknownStep(#[from] UnknownStepName),

    #[error("Step index {index} has no step on job")]
    MissingStep { index: usize },
}

impl From<MutateError> for CoordinatorError {
    fn from(err: MutateError) -> Self {
        match err {
            MutateError::Store(e) => CoordinatorError::Store(e),
            MutateError::Domain(e) => CoordinatorError::Domain(e),
        }
    }
}

pub struct SagaCoordinator {
    sagas: Arc<dyn SagaRepository>,
    jobs: Arc<dyn JobRepository>,
    artifacts: Arc<dyn ArtifactRepository>,
    bus: Arc<dyn MessageBus>,
    notifications: Arc<dyn NotificationSink>,
}

impl SagaCoordinator {
    pub fn new(
        sagas: Arc<dyn SagaRepository>,
        jobs: Arc<dyn JobRepository>,
        artifacts: Arc<dyn ArtifactRepository>,
        bus: Arc<dyn MessageBus>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            sagas,
            jobs,
            artifacts,
            bus,
            notifications,
        }
    }

    /// Apply one pipeline event. Unroutable or duplicate events are
    /// logged and dropped; only infrastructure trouble is an error.
    pub async fn handle_event(&self, event: PipelineEvent) -> Result<(), CoordinatorError> {
        match event {
            PipelineEvent::JobStarted {
                job_id,
                correlation_id,
                step_names,
            } => {
                if self.sagas.get(correlation_id).await?.is_some() {
                    warn!(%correlation_id, "duplicate job-started event, dropping");
                    return Ok(());
                }

                let (state, decision) = SagaState::start(correlation_id, job_id, step_names);
                self.sagas.insert(state.clone()).await?;

                // the saga owns job lifecycle transitions during the run
                let job = mutate_job(self.jobs.as_ref(), job_id, |job| job.start()).await;
                match job {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        warn!(%job_id, "job-started event for missing job");
                        return Ok(());
                    }
                    Err(MutateError::Domain(err)) => {
                        warn!(%job_id, %err, "job could not start, dropping event");
                        return Ok(());
                    }
                    Err(other) => return Err(other.into()),
                }

                info!(%job_id, %correlation_id, "saga started");
                self.act(&state, decision).await
            }

            PipelineEvent::StepCompleted {
                step_name,
                correlation_id,
                ..
            } => {
                let Some(mut state) = self.sagas.get(correlation_id).await? else {
                    warn!(%correlation_id, "step-completed for unknown saga, dropping");
                    return Ok(());
                };

                // a pause request holds the pipeline between steps
                let pausing = match self.jobs.get(state.job_id).await? {
                    Some(v) => v.value.status == JobStatus::Pausing,
                    None => false,
                };

                let decision = state.on_step_completed(&step_name, pausing);
                self.sagas.update(state.clone()).await?;
                self.act(&state, decision).await
            }

            PipelineEvent::StepFailed {
                step_name,
                error,
                will_retry,
                correlation_id,
                ..
            } => {
                let Some(mut state) = self.sagas.get(correlation_id).await? else {
                    warn!(%correlation_id, "step-failed for unknown saga, dropping");
                    return Ok(());
                };

                let decision = state.on_step_failed(&step_name, &error, will_retry);
                self.sagas.update(state.clone()).await?;
                self.act(&state, decision).await
            }

            PipelineEvent::JobCancelRequested { correlation_id, .. } => {
                let Some(mut state) = self.sagas.get(correlation_id).await? else {
                    warn!(%correlation_id, "cancel request for unknown saga, dropping");
                    return Ok(());
                };

                let decision = state.on_cancel_requested();
                self.sagas.update(state.clone()).await?;
                self.act(&state, decision).await
            }

            PipelineEvent::JobResumed { correlation_id, .. } => {
                let Some(mut state) = self.sagas.get(correlation_id).await? else {
                    warn!(%correlation_id, "resume event for unknown saga, dropping");
                    return Ok(());
                };

                let decision = state.on_resumed();
                self.sagas.update(state.clone()).await?;
                self.act(&state, decision).await
            }
        }
    }

    async fn act(&self, state: &SagaState, decision: SagaDecision) -> Result<(), CoordinatorError> {
        match decision {
            SagaDecision::DispatchStep(index) => self.dispatch(state, index).await,
            SagaDecision::RedispatchStep(index) => {
                info!(
                    job_id = %state.job_id,
                    stage = state.stage_label(),
                    "redispatching retrying step"
                );
                self.dispatch(state, index).await
            }
            SagaDecision::FinalizeSuccess => self.finalize_success(state).await,
            SagaDecision::FinalizeFailure { error } => self.finalize_failure(state, error).await,
            SagaDecision::FinalizeCancellation => self.finalize_cancellation(state).await,
            SagaDecision::Hold => self.hold_for_pause(state).await,
            SagaDecision::Ignore => Ok(()),
        }
    }

    async fn dispatch(&self, state: &SagaState, index: usize) -> Result<(), CoordinatorError> {
        let Some(versioned) = self.jobs.get(state.job_id).await? else {
            warn!(job_id = %state.job_id, "cannot dispatch step, job is gone");
            return Ok(());
        };
        let job = versioned.value;

        let command = build_step_command(self.artifacts.as_ref(), &job, index).await?;
        info!(
            job_id = %state.job_id,
            step = %command.kind(),
            index,
            "dispatching step"
        );
        self.bus.dispatch(command).await?;
        Ok(())
    }

    async fn finalize_success(&self, state: &SagaState) -> Result<(), CoordinatorError> {
        let job = mutate_job(self.jobs.as_ref(), state.job_id, |job| job.complete()).await;
        match job {
            Ok(Some(job)) => {
                info!(job_id = %job.id, "migration completed");
                self.notifications
                    .job_progress(job.id, job.progress, job.status)
                    .await;
                Ok(())
            }
            Ok(None) => {
                warn!(job_id = %state.job_id, "job vanished before completion");
                Ok(())
            }
            Err(MutateError::Domain(err)) => {
                // e.g. a concurrent manual retry left a step unsettled
                warn!(job_id = %state.job_id, %err, "job refused completion");
                Ok(())
            }
            Err(other) => Err(other.into()),
        }
    }

    async fn finalize_failure(
        &self,
        state: &SagaState,
        error: String,
    ) -> Result<(), CoordinatorError> {
        let reason = error.clone();
        let job = mutate_job(self.jobs.as_ref(), state.job_id, move |job| {
            job.fail(reason.clone())
        })
        .await;
        match job {
            Ok(Some(job)) => {
                warn!(job_id = %job.id, %error, "migration failed");
                self.notifications
                    .job_progress(job.id, job.progress, job.status)
                    .await;
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(MutateError::Domain(err)) => {
                warn!(job_id = %state.job_id, %err, "job not in a failable state");
                Ok(())
            }
            Err(other) => Err(other.into()),
        }
    }

    async fn finalize_cancellation(&self, state: &SagaState) -> Result<(), CoordinatorError> {
        let job = mutate_job(self.jobs.as_ref(), state.job_id, |job| job.cancel()).await;
        match job {
            Ok(Some(job)) => {
                info!(job_id = %job.id, "migration cancelled");
                self.notifications
                    .job_progress(job.id, job.progress, job.status)
                    .await;
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(MutateError::Domain(err)) => {
                warn!(job_id = %state.job_id, %err, "job not in a cancellable state");
                Ok(())
            }
            Err(other) => Err(other.into()),
        }
    }

    async fn hold_for_pause(&self, state: &SagaState) -> Result<(), CoordinatorError> {
        let job = mutate_job(self.jobs.as_ref(), state.job_id, |job| job.pause()).await;
        match job {
            Ok(Some(job)) => {
                info!(job_id = %job.id, stage = state.stage_label(), "pipeline paused");
                self.notifications
                    .job_progress(job.id, job.progress, job.status)
                    .await;
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(MutateError::Domain(err)) => {
                warn!(job_id = %state.job_id, %err, "pause no longer applicable");
                Ok(())
            }
            Err(other) => Err(other.into()),
        }
    }
}

/// Build the kind-specific dispatch payload for the step at `index`
/// from the job's own fields.
pub(crate) async fn build_step_command(
    artifacts: &dyn ArtifactRepository,
    job: &MigrationJob,
    index: usize,
) -> Result<StepCommand, CoordinatorError> {
    let step = job
        .step_at(index)
        .ok_or(CoordinatorError::MissingStep { index })?;
    let kind: StepKind = step.name.parse()?;

    let meta = StepRef {
        job_id: job.id,
        step_id: step.id,
        correlation_id: job.correlation_id,
    };
    let format = job.options.target_disk_format;
    let vm = &job.source_vm;

    let command = match kind {
        StepKind::ExportVmdk => StepCommand::ExportVmdk {
            meta,
            source_connection_id: job.source_connection_id,
            vm_id: vm.vm_id.clone(),
            disk_key: vm.disk_key.clone(),
            output_key: keys::export_key(job.id, &vm.disk_key),
        },
        StepKind::ConvertDisk => StepCommand::ConvertDisk {
            meta,
            input_key: keys::export_key(job.id, &vm.disk_key),
            output_key: keys::converted_key(job.id, format),
            target_format: format,
        },
        StepKind::UploadArtifact => StepCommand::UploadArtifact {
            meta,
            source_key: keys::converted_key(job.id, format),
            storage_key: keys::artifact_key(job.id, format),
            format,
        },
        StepKind::ImportToPve => StepCommand::ImportToPve {
            meta,
            target_connection_id: job.target_connection_id,
            storage_key: keys::artifact_key(job.id, format),
            disk_format: format,
            vm_name: vm.name.clone(),
            cores: vm.cores,
            memory_mb: vm.memory_mb,
        },
        StepKind::Verify => {
            let artifact_id = artifacts
                .list_by_job(job.id)
                .await?
                .into_iter()
                .max_by_key(|a| a.created_at)
                .map(|a| a.id);
            StepCommand::Verify { meta, artifact_id }
        }
        StepKind::EnableCbt => StepCommand::EnableCbt {
            meta,
            source_connection_id: job.source_connection_id,
            vm_id: vm.vm_id.clone(),
        },
        StepKind::IncrementalPull => StepCommand::IncrementalPull {
            meta,
            source_connection_id: job.source_connection_id,
            vm_id: vm.vm_id.clone(),
            // "*" asks the source for a full initial sync
            change_id: "*".to_string(),
            base_storage_key: keys::base_key(job.id, format),
        },
        StepKind::ApplyDelta => StepCommand::ApplyDelta {
            meta,
            delta_key: keys::delta_key(job.id, "*"),
            target_key: keys::base_key(job.id, format),
            target_format: format,
        },
        StepKind::FinalSyncCutover => StepCommand::FinalSyncCutover {
            meta,
            source_connection_id: job.source_connection_id,
            target_connection_id: job.target_connection_id,
            vm_id: vm.vm_id.clone(),
            vm_name: vm.name.clone(),
            cores: vm.cores,
            memory_mb: vm.memory_mb,
            storage_key: keys::base_key(job.id, format),
            disk_format: format,
        },
    };

    Ok(command)
}
