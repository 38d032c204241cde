//! Generic step executor.
//!
//! Every step kind shares one execution protocol; only the external
//! operation differs. The protocol is:
//!
//! 1. receive a dispatch command (job id, step id, correlation id, payload)
//! 2. load the job and locate the step - a missing job or step means the
//!    message is stale and it is logged and dropped
//! 3. move the step to `Running`, persist, emit a 0% notification
//! 4. run the performer, pumping its progress reports into persisted
//!    step progress plus notifications
//! 5. on success: complete the step, recompute job progress, persist,
//!    emit 100%, publish a step-completed event
//! 6. on failure: record the error; if retry budget remains the step is
//!    immediately moved to `Retrying`, otherwise it stays `Failed`;
//!    persist, notify, publish a step-failed event
//!
//! Failures never escape to the saga as errors - the saga only ever
//! observes events. Scratch files are removed on every exit path.

use crate::messages::{PipelineEvent, StepCommand};
use crate::ports::{
    mutate_job, BusError, ConvertError, HypervisorError, JobRepository, MessageBus, MutateError,
    NotificationSink, StorageError, StoreError, Versioned,
};
use crate::progress::ProgressSender;
use aldatu_domain::{DomainError, JobId, MigrationJob, StepId, StepKind, StepStatus};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Failure of a step's external operation, as seen by the executor.
#[derive(Debug, thiserror::Error)]
pub enum PerformError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Hypervisor(#[from] HypervisorError),

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error("Store failure during step: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Failed(String),

    #[error("Step cancelled")]
    Cancelled,

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Infrastructure errors the executor itself can hit. Step failures are
/// not errors - they become step-failed events.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("No performer registered for step kind {0}")]
    NoPerformer(StepKind),

    #[error("Invalid step transition: {0}")]
    Domain(#[from] DomainError),
}

impl From<MutateError> for ExecutorError {
    fn from(err: MutateError) -> Self {
        match err {
            MutateError::Store(e) => ExecutorError::Store(e),
            MutateError::Domain(e) => ExecutorError::Domain(e),
        }
    }
}

/// Everything a performer gets to work with.
pub struct StepContext {
    pub job: MigrationJob,
    /// Private scratch directory, removed by the executor afterwards.
    pub scratch_dir: PathBuf,
    pub progress: ProgressSender,
    pub cancel: CancellationToken,
}

/// The capability interface implemented once per step kind.
#[async_trait::async_trait]
pub trait StepPerformer: Send + Sync {
    fn kind(&self) -> StepKind;

    async fn perform(&self, ctx: &StepContext, command: &StepCommand) -> Result<(), PerformError>;
}

/// Executes dispatch commands through the shared protocol.
pub struct StepExecutor {
    jobs: Arc<dyn JobRepository>,
    notifications: Arc<dyn NotificationSink>,
    bus: Arc<dyn MessageBus>,
    performers: HashMap<StepKind, Arc<dyn StepPerformer>>,
    scratch_root: PathBuf,
}

impl StepExecutor {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        notifications: Arc<dyn NotificationSink>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            jobs,
            notifications,
            bus,
            performers: HashMap::new(),
            scratch_root: std::env::temp_dir(),
        }
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    /// Register the performer for one step kind; the last registration
    /// per kind wins.
    pub fn register(mut self, performer: Arc<dyn StepPerformer>) -> Self {
        self.performers.insert(performer.kind(), performer);
        self
    }

    /// Run one dispatch command to completion (success or failure
    /// event). Only infrastructure trouble surfaces as `Err`.
    pub async fn execute(
        &self,
        command: StepCommand,
        cancel: CancellationToken,
    ) -> Result<(), ExecutorError> {
        let meta = command.meta();
        let kind = command.kind();

        info!(job_id = %meta.job_id, step_id = %meta.step_id, step = %kind, "step starting");

        let performer = self
            .performers
            .get(&kind)
            .cloned()
            .ok_or(ExecutorError::NoPerformer(kind))?;

        // Phase 2: load and locate. A missing job or step is a stale
        // message; drop it without scheduling a retry.
        let Some(Versioned { value: mut job, version }) = self.jobs.get(meta.job_id).await? else {
            warn!(job_id = %meta.job_id, "job not found, dropping step command");
            return Ok(());
        };

        // Phase 3: transition to Running. A guard failure here means the
        // command was redelivered for a step that already ran.
        let Some(step) = job.step_by_id_mut(meta.step_id) else {
            warn!(job_id = %meta.job_id, step_id = %meta.step_id, "step not found, dropping command");
            return Ok(());
        };
        if let Err(err) = step.start() {
            warn!(job_id = %meta.job_id, step_id = %meta.step_id, %err, "dropping redelivered step command");
            return Ok(());
        }
        self.jobs.update(&job, version).await?;
        self.notifications
            .step_progress(meta.job_id, meta.step_id, 0, StepStatus::Running)
            .await;

        // Phase 4: run the performer with a progress pump on the side.
        let (progress, rx) = ProgressSender::channel(64);
        let pump = self.spawn_progress_pump(meta.job_id, meta.step_id, rx);

        let scratch_dir = self
            .scratch_root
            .join(format!("aldatu-{}-{}", meta.job_id, meta.step_id));
        if let Err(err) = tokio::fs::create_dir_all(&scratch_dir).await {
            error!(%err, "failed to create scratch directory");
        }

        let ctx = StepContext {
            job,
            scratch_dir: scratch_dir.clone(),
            progress,
            cancel,
        };

        // The performer runs in its own task so that an unexpected panic
        // is captured like any other external failure.
        let outcome = {
            let command = command.clone();
            let handle = tokio::spawn(async move {
                let result = performer.perform(&ctx, &command).await;
                drop(ctx); // closes the progress channel
                result
            });
            match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(PerformError::Failed(format!(
                    "step execution aborted unexpectedly: {join_err}"
                ))),
            }
        };

        // Let the pump drain remaining ticks before the final persist.
        let _ = pump.await;
        let _ = tokio::fs::remove_dir_all(&scratch_dir).await;

        // Phases 5/6.
        match outcome {
            Ok(()) => self.finish_success(&command).await,
            Err(err) => self.finish_failure(&command, err).await,
        }
    }

    async fn finish_success(&self, command: &StepCommand) -> Result<(), ExecutorError> {
        let meta = command.meta();
        let mut step_name = String::new();

        let outcome = mutate_job(self.jobs.as_ref(), meta.job_id, |job| {
            let step = step_of(job, meta.step_id)?;
            step.complete()?;
            step_name = step.name.clone();
            job.update_progress();
            Ok(())
        })
        .await;

        let job = match outcome {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %meta.job_id, "job disappeared before completion persist");
                return Ok(());
            }
            // a guard failure here means another delivery of this step
            // already settled it
            Err(MutateError::Domain(err)) => {
                warn!(job_id = %meta.job_id, %err, "step already settled, dropping outcome");
                return Ok(());
            }
            Err(MutateError::Store(err)) => return Err(err.into()),
        };

        info!(job_id = %meta.job_id, step = %step_name, "step succeeded");

        self.notifications
            .step_progress(meta.job_id, meta.step_id, 100, StepStatus::Succeeded)
            .await;
        self.notifications
            .job_progress(meta.job_id, job.progress, job.status)
            .await;

        self.bus
            .publish(PipelineEvent::StepCompleted {
                job_id: meta.job_id,
                step_id: meta.step_id,
                step_name,
                correlation_id: meta.correlation_id,
            })
            .await?;
        Ok(())
    }

    async fn finish_failure(
        &self,
        command: &StepCommand,
        failure: PerformError,
    ) -> Result<(), ExecutorError> {
        let meta = command.meta();
        let error_text = failure.to_string();
        let mut step_name = String::new();
        let mut will_retry = false;
        let mut progress = 0u8;
        let mut status = StepStatus::Failed;

        let outcome = mutate_job(self.jobs.as_ref(), meta.job_id, |job| {
            let step = step_of(job, meta.step_id)?;
            step.fail(error_text.clone())?;
            // Budget permitting, park the step in Retrying so the
            // saga can redispatch it; the failure stays recorded on
            // the event.
            if step.can_retry() {
                step.retry()?;
            }
            step_name = step.name.clone();
            will_retry = step.status == StepStatus::Retrying;
            progress = step.progress;
            status = step.status;
            job.update_progress();
            Ok(())
        })
        .await;

        match outcome {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(job_id = %meta.job_id, "job disappeared before failure persist");
                return Ok(());
            }
            Err(MutateError::Domain(err)) => {
                warn!(job_id = %meta.job_id, %err, "step already settled, dropping failure");
                return Ok(());
            }
            Err(MutateError::Store(err)) => return Err(err.into()),
        }

        warn!(
            job_id = %meta.job_id,
            step = %step_name,
            error = %error_text,
            will_retry,
            "step failed"
        );

        self.notifications
            .step_progress(meta.job_id, meta.step_id, progress, status)
            .await;

        self.bus
            .publish(PipelineEvent::StepFailed {
                job_id: meta.job_id,
                step_id: meta.step_id,
                step_name,
                error: error_text,
                will_retry,
                correlation_id: meta.correlation_id,
            })
            .await?;
        Ok(())
    }

    /// Consume progress ticks: persist the step's progress and push a
    /// notification per tick. Regressing values are ignored so the
    /// reported sequence stays non-decreasing.
    fn spawn_progress_pump(
        &self,
        job_id: JobId,
        step_id: StepId,
        mut rx: mpsc::Receiver<u8>,
    ) -> tokio::task::JoinHandle<()> {
        let jobs = Arc::clone(&self.jobs);
        let notifications = Arc::clone(&self.notifications);

        tokio::spawn(async move {
            let mut last = 0u8;
            while let Some(tick) = rx.recv().await {
                if tick <= last {
                    continue;
                }
                last = tick;

                let loaded = match jobs.get(job_id).await {
                    Ok(Some(v)) => v,
                    Ok(None) => break,
                    Err(err) => {
                        warn!(%job_id, %err, "progress persist failed");
                        continue;
                    }
                };
                let Versioned { value: mut job, version } = loaded;
                let Some(step) = job.step_by_id_mut(step_id) else {
                    break;
                };
                if step.update_progress(tick).is_err() {
                    // step already left Running; stop persisting ticks
                    break;
                }
                if let Err(err) = jobs.update(&job, version).await {
                    // lost a race with another writer; drop this tick
                    debug!(%job_id, %err, "progress tick dropped");
                    continue;
                }
                notifications
                    .step_progress(job_id, step_id, tick, StepStatus::Running)
                    .await;
            }
        })
    }
}

fn step_of(
    job: &mut MigrationJob,
    step_id: StepId,
) -> Result<&mut aldatu_domain::JobStep, DomainError> {
    let job_id = job.id;
    job.step_by_id_mut(step_id)
        .ok_or(DomainError::StepNotFound { job_id, step_id })
}
