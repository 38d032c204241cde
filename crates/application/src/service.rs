//! Job lifecycle use cases: the surface the API adapters sit on.

use crate::coordinator::{build_step_command, CoordinatorError};
use crate::messages::PipelineEvent;
use crate::ports::{
    mutate_job, ArtifactRepository, BusError, JobRepository, MessageBus, MutateError, StoreError,
};
use aldatu_domain::{
    DomainError, JobId, JobStatus, MigrationJob, MigrationOptions, MigrationStrategy,
    ConnectionId, StepId, StorageTarget, VmSpec,
};
use std::sync::Arc;
use tracing::info;

/// Errors surfaced to API callers.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Dispatch(#[from] CoordinatorError),

    #[error("Job not found: {0}")]
    NotFound(JobId),
}

impl From<MutateError> for ServiceError {
    fn from(err: MutateError) -> Self {
        match err {
            MutateError::Store(e) => ServiceError::Store(e),
            MutateError::Domain(e) => ServiceError::Domain(e),
        }
    }
}

/// What a caller provides to create a migration job.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub source_connection_id: ConnectionId,
    pub target_connection_id: ConnectionId,
    pub source_vm: VmSpec,
    pub storage_target: StorageTarget,
    pub strategy: MigrationStrategy,
    pub options: MigrationOptions,
}

pub struct JobService {
    jobs: Arc<dyn JobRepository>,
    artifacts: Arc<dyn ArtifactRepository>,
    bus: Arc<dyn MessageBus>,
}

impl JobService {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        artifacts: Arc<dyn ArtifactRepository>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            jobs,
            artifacts,
            bus,
        }
    }

    /// Create a job with its strategy's step plan attached.
    pub async fn create(&self, request: CreateJobRequest) -> Result<MigrationJob, ServiceError> {
        let mut job = MigrationJob::with_planned_steps(
            request.source_connection_id,
            request.target_connection_id,
            request.source_vm,
            request.storage_target,
            request.strategy,
            request.options,
        );
        let events = job.drain_events();
        self.jobs.add(&job).await?;
        for event in events {
            tracing::debug!(job_id = %job.id, ?event, "domain event");
        }
        info!(job_id = %job.id, strategy = %job.strategy, "job created");
        Ok(job)
    }

    /// Queue the job and kick off its pipeline.
    pub async fn enqueue(&self, job_id: JobId) -> Result<(), ServiceError> {
        let job = mutate_job(self.jobs.as_ref(), job_id, |job| job.enqueue())
            .await?
            .ok_or(ServiceError::NotFound(job_id))?;

        self.bus
            .publish(PipelineEvent::JobStarted {
                job_id: job.id,
                correlation_id: job.correlation_id,
                step_names: job.steps().iter().map(|s| s.name.clone()).collect(),
            })
            .await?;
        info!(job_id = %job.id, "job enqueued");
        Ok(())
    }

    /// Ask a running job to pause once the in-flight step finishes.
    pub async fn request_pause(&self, job_id: JobId) -> Result<(), ServiceError> {
        mutate_job(self.jobs.as_ref(), job_id, |job| job.request_pause())
            .await?
            .ok_or(ServiceError::NotFound(job_id))?;
        info!(%job_id, "pause requested");
        Ok(())
    }

    /// Resume a paused job; the saga re-dispatches the held step.
    pub async fn resume(&self, job_id: JobId) -> Result<(), ServiceError> {
        let job = mutate_job(self.jobs.as_ref(), job_id, |job| {
            job.request_resume()?;
            job.resume()
        })
        .await?
        .ok_or(ServiceError::NotFound(job_id))?;

        self.bus
            .publish(PipelineEvent::JobResumed {
                job_id: job.id,
                correlation_id: job.correlation_id,
            })
            .await?;
        info!(%job_id, "job resumed");
        Ok(())
    }

    /// Ask for cancellation. The saga finalizes the job; the worker also
    /// aborts the in-flight operation cooperatively.
    pub async fn request_cancel(&self, job_id: JobId) -> Result<(), ServiceError> {
        let job = mutate_job(self.jobs.as_ref(), job_id, |job| job.request_cancel())
            .await?
            .ok_or(ServiceError::NotFound(job_id))?;

        self.bus
            .publish(PipelineEvent::JobCancelRequested {
                job_id: job.id,
                correlation_id: job.correlation_id,
            })
            .await?;
        info!(%job_id, "cancellation requested");
        Ok(())
    }

    /// Operator-triggered retry of a terminally failed step. This
    /// dispatches outside the saga and can race with it; the saga's
    /// duplicate guards absorb the overlap.
    pub async fn retry_step(&self, job_id: JobId, step_id: StepId) -> Result<(), ServiceError> {
        let mut index = 0usize;
        let job = mutate_job(self.jobs.as_ref(), job_id, |job| {
            let step = job
                .step_by_id_mut(step_id)
                .ok_or(DomainError::StepNotFound { job_id, step_id })?;
            step.retry()?;
            index = step.order as usize;
            Ok(())
        })
        .await?
        .ok_or(ServiceError::NotFound(job_id))?;

        let command = build_step_command(self.artifacts.as_ref(), &job, index).await?;
        self.bus.dispatch(command).await?;
        info!(%job_id, %step_id, "step retry dispatched");
        Ok(())
    }

    pub async fn get(&self, job_id: JobId) -> Result<Option<MigrationJob>, ServiceError> {
        Ok(self.jobs.get(job_id).await?.map(|v| v.value))
    }

    pub async fn list(
        &self,
        offset: usize,
        limit: usize,
        status: Option<JobStatus>,
    ) -> Result<Vec<MigrationJob>, ServiceError> {
        Ok(self.jobs.list(offset, limit, status).await?)
    }

    pub async fn count(&self, status: Option<JobStatus>) -> Result<usize, ServiceError> {
        Ok(self.jobs.count(status).await?)
    }

    pub async fn artifacts_for(&self, job_id: JobId) -> Result<Vec<aldatu_domain::Artifact>, ServiceError> {
        Ok(self.artifacts.list_by_job(job_id).await?)
    }
}
