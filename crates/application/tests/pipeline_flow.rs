//! End-to-end pipeline tests over the in-memory infrastructure: the
//! saga coordinator, the generic step executor and all nine performers
//! wired together exactly as the worker binary wires them.

use aldatu_application::messages::PipelineEvent;
use aldatu_application::ports::{
    ArtifactRepository, ConvertError, DiskConverter, JobRepository, MessageBus, NotificationSink,
    SourceHypervisor, StorageFactory, TargetHypervisor,
};
use aldatu_application::progress::ProgressSender;
use aldatu_application::service::{CreateJobRequest, JobService};
use aldatu_application::steps::{
    ApplyDeltaPerformer, ConvertDiskPerformer, EnableCbtPerformer, ExportVmdkPerformer,
    FinalSyncCutoverPerformer, ImportToPvePerformer, IncrementalPullPerformer,
    UploadArtifactPerformer, VerifyPerformer,
};
use aldatu_application::{SagaCoordinator, StepExecutor};
use aldatu_domain::{
    ConnectionId, DomainError, JobStatus, MigrationJob, MigrationOptions, MigrationStrategy,
    StepStatus, StorageTarget, VmSpec,
};
use aldatu_infrastructure::{
    BroadcastNotifier, LocalStorageFactory, MemoryArtifactRepository, MemoryJobRepository,
    MockSourceHypervisor, MockTargetHypervisor, ProgressUpdate, TokioMessageBus,
};
use aldatu_saga::{MemorySagaRepository, SagaRepository, SagaStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const POLL: Duration = Duration::from_millis(50);

/// Converter used in place of the real qemu-img process: copies the
/// input file and reports progress like the tool would.
struct CopyConverter;

#[async_trait::async_trait]
impl DiskConverter for CopyConverter {
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        _target_format: aldatu_domain::DiskFormat,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<(), ConvertError> {
        if cancel.is_cancelled() {
            return Err(ConvertError::Cancelled);
        }
        progress.report(50).await;
        tokio::fs::copy(input, output)
            .await
            .map_err(|e| ConvertError::Io(e.to_string()))?;
        progress.report(100).await;
        Ok(())
    }

    async fn inspect(&self, _path: &Path) -> Result<String, ConvertError> {
        Ok("{}".to_string())
    }
}

/// Converter that always fails; drives the retry scenarios.
struct BrokenConverter;

#[async_trait::async_trait]
impl DiskConverter for BrokenConverter {
    async fn convert(
        &self,
        _input: &Path,
        _output: &Path,
        _target_format: aldatu_domain::DiskFormat,
        _progress: &ProgressSender,
        _cancel: &CancellationToken,
    ) -> Result<(), ConvertError> {
        Err(ConvertError::CommandFailed {
            exit_code: 1,
            stderr: "conversion crashed".to_string(),
        })
    }

    async fn inspect(&self, _path: &Path) -> Result<String, ConvertError> {
        Err(ConvertError::CommandFailed {
            exit_code: 1,
            stderr: "conversion crashed".to_string(),
        })
    }
}

struct TestEnv {
    jobs: Arc<dyn JobRepository>,
    artifacts: Arc<dyn ArtifactRepository>,
    sagas: Arc<MemorySagaRepository>,
    bus: Arc<dyn MessageBus>,
    notifier: Arc<BroadcastNotifier>,
    target: Arc<MockTargetHypervisor>,
    source: Arc<MockSourceHypervisor>,
    executor: StepExecutor,
    coordinator: SagaCoordinator,
    service: JobService,
    storage_root: PathBuf,
}

fn test_env(converter: Arc<dyn DiskConverter>) -> TestEnv {
    let storage_root = std::env::temp_dir().join(format!(
        "aldatu-pipeline-{}",
        uuid_like()
    ));

    let jobs: Arc<dyn JobRepository> = Arc::new(MemoryJobRepository::new());
    let artifacts: Arc<dyn ArtifactRepository> = Arc::new(MemoryArtifactRepository::new());
    let sagas = Arc::new(MemorySagaRepository::new());
    let sagas_dyn: Arc<dyn SagaRepository> = sagas.clone();
    let bus: Arc<dyn MessageBus> = Arc::new(TokioMessageBus::new(256));
    let notifier = Arc::new(BroadcastNotifier::new(2048));
    let notifications: Arc<dyn NotificationSink> = notifier.clone();

    let source = Arc::new(MockSourceHypervisor::new());
    let source_dyn: Arc<dyn SourceHypervisor> = source.clone();
    let target = Arc::new(MockTargetHypervisor::new());
    let target_dyn: Arc<dyn TargetHypervisor> = target.clone();
    let storage: Arc<dyn StorageFactory> = Arc::new(LocalStorageFactory::new());

    let executor = StepExecutor::new(
        Arc::clone(&jobs),
        Arc::clone(&notifications),
        Arc::clone(&bus),
    )
    .with_scratch_root(storage_root.join("scratch"))
    .register(Arc::new(ExportVmdkPerformer::new(
        Arc::clone(&source_dyn),
        Arc::clone(&storage),
    )))
    .register(Arc::new(ConvertDiskPerformer::new(
        Arc::clone(&storage),
        Arc::clone(&converter),
    )))
    .register(Arc::new(UploadArtifactPerformer::new(
        Arc::clone(&storage),
        Arc::clone(&artifacts),
    )))
    .register(Arc::new(ImportToPvePerformer::new(Arc::clone(&target_dyn))))
    .register(Arc::new(VerifyPerformer::new(
        Arc::clone(&storage),
        Arc::clone(&artifacts),
    )))
    .register(Arc::new(EnableCbtPerformer::new(Arc::clone(&source_dyn))))
    .register(Arc::new(IncrementalPullPerformer::new(
        Arc::clone(&source_dyn),
        Arc::clone(&storage),
    )))
    .register(Arc::new(ApplyDeltaPerformer::new(
        Arc::clone(&storage),
        Arc::clone(&artifacts),
    )))
    .register(Arc::new(FinalSyncCutoverPerformer::new(
        Arc::clone(&source_dyn),
        Arc::clone(&target_dyn),
        Arc::clone(&storage),
        Arc::clone(&artifacts),
    )));

    let coordinator = SagaCoordinator::new(
        sagas_dyn,
        Arc::clone(&jobs),
        Arc::clone(&artifacts),
        Arc::clone(&bus),
        Arc::clone(&notifications),
    );

    let service = JobService::new(
        Arc::clone(&jobs),
        Arc::clone(&artifacts),
        Arc::clone(&bus),
    );

    TestEnv {
        jobs,
        artifacts,
        sagas,
        bus,
        notifier,
        target,
        source,
        executor,
        coordinator,
        service,
        storage_root,
    }
}

fn uuid_like() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    )
}

impl TestEnv {
    fn create_request(&self, strategy: MigrationStrategy, max_retries: u32) -> CreateJobRequest {
        CreateJobRequest {
            source_connection_id: ConnectionId::new(),
            target_connection_id: ConnectionId::new(),
            source_vm: VmSpec::new("vm-101", "web-server-01", "disk-0", 4, 8192),
            storage_target: StorageTarget::local(self.storage_root.to_string_lossy().to_string()),
            strategy,
            options: MigrationOptions {
                max_retries,
                ..MigrationOptions::default()
            },
        }
    }

    /// Process bus traffic - events through the coordinator, commands
    /// through the executor - until the system is quiescent.
    async fn drive(&self) {
        let mut idle_rounds = 0;
        while idle_rounds < 2 {
            let mut acted = false;
            while let Some(event) = self.bus.fetch_event(POLL).await.unwrap() {
                self.coordinator.handle_event(event).await.unwrap();
                acted = true;
            }
            while let Some(command) = self.bus.fetch_command(POLL).await.unwrap() {
                self.executor
                    .execute(command, CancellationToken::new())
                    .await
                    .unwrap();
                acted = true;
            }
            if acted {
                idle_rounds = 0;
            } else {
                idle_rounds += 1;
            }
        }
    }

    async fn job(&self, job_id: aldatu_domain::JobId) -> MigrationJob {
        self.jobs.get(job_id).await.unwrap().unwrap().value
    }
}

#[tokio::test]
async fn full_copy_pipeline_runs_to_succeeded() {
    let env = test_env(Arc::new(CopyConverter));
    let job = env
        .service
        .create(env.create_request(MigrationStrategy::FullCopy, 2))
        .await
        .unwrap();

    env.service.enqueue(job.id).await.unwrap();
    env.drive().await;

    let finished = env.job(job.id).await;
    assert_eq!(finished.status, JobStatus::Succeeded);
    assert_eq!(finished.progress, 100);
    assert!(finished
        .steps()
        .iter()
        .all(|s| s.status == StepStatus::Succeeded));

    // the upload step recorded exactly one artifact with a checksum
    let artifacts = env.artifacts.list_by_job(job.id).await.unwrap();
    assert_eq!(artifacts.len(), 1);
    assert!(!artifacts[0].checksum.value.is_empty());
    assert!(artifacts[0].size_bytes > 0);

    // the import step created and configured a VM on the target
    assert_eq!(env.target.created_count(), 1);

    // the saga reached its terminal success state
    let saga = env
        .sagas
        .get(finished.correlation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saga.status, SagaStatus::Completed);
    assert_eq!(saga.current_step_index, 5);
}

#[tokio::test]
async fn incremental_pipeline_runs_to_succeeded() {
    let env = test_env(Arc::new(CopyConverter));
    let job = env
        .service
        .create(env.create_request(MigrationStrategy::Incremental, 2))
        .await
        .unwrap();

    env.service.enqueue(job.id).await.unwrap();
    env.drive().await;

    let finished = env.job(job.id).await;
    assert_eq!(finished.status, JobStatus::Succeeded);
    assert!(finished
        .steps()
        .iter()
        .all(|s| s.status == StepStatus::Succeeded));

    // change tracking got enabled on the source VM
    assert!(env
        .source
        .is_cbt_enabled(job.source_connection_id, "vm-101")
        .await
        .unwrap());

    // the delta pipeline recorded the synchronised image as an artifact
    let artifacts = env.artifacts.list_by_job(job.id).await.unwrap();
    assert!(!artifacts.is_empty());

    // cutover created the target VM
    assert_eq!(env.target.created_count(), 1);
}

#[tokio::test]
async fn completing_a_job_before_steps_succeed_is_rejected() {
    // Scenario A
    let mut job = MigrationJob::with_planned_steps(
        ConnectionId::new(),
        ConnectionId::new(),
        VmSpec::new("vm-101", "web-server-01", "disk-0", 4, 8192),
        StorageTarget::local("/tmp"),
        MigrationStrategy::FullCopy,
        MigrationOptions::default(),
    );
    assert_eq!(job.steps().len(), 5);
    job.enqueue().unwrap();
    job.start().unwrap();

    let err = job.complete().unwrap_err();
    assert_eq!(err, DomainError::IncompleteSteps);
    assert_eq!(job.status, JobStatus::Running);
}

#[tokio::test]
async fn convert_failures_exhaust_retries_then_fail_the_job() {
    // Scenario B: max retries 2, three consecutive failures
    let env = test_env(Arc::new(BrokenConverter));
    let job = env
        .service
        .create(env.create_request(MigrationStrategy::FullCopy, 2))
        .await
        .unwrap();

    env.service.enqueue(job.id).await.unwrap();
    env.drive().await;

    let finished = env.job(job.id).await;
    let convert = finished
        .steps()
        .iter()
        .find(|s| s.name == "ConvertDisk")
        .unwrap();

    // two retries were consumed, the third failure was terminal
    assert_eq!(convert.retry_count, 2);
    assert_eq!(convert.status, StepStatus::Failed);
    assert!(convert
        .error_message
        .as_deref()
        .unwrap()
        .contains("conversion crashed"));

    // a further retry is refused
    let mut job_copy = finished.clone();
    let step_id = convert.id;
    let err = job_copy.step_by_id_mut(step_id).unwrap().retry().unwrap_err();
    assert_eq!(
        err,
        DomainError::RetriesExhausted {
            step: "ConvertDisk".to_string(),
            max_retries: 2
        }
    );

    assert_eq!(finished.status, JobStatus::Failed);
    assert!(finished.result.as_deref().unwrap().contains("conversion crashed"));

    let saga = env
        .sagas
        .get(finished.correlation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saga.status, SagaStatus::Failed);
}

#[tokio::test]
async fn saga_failure_is_terminal_even_for_late_completions() {
    // Scenario C, at the event level: saga in the upload slot
    let env = test_env(Arc::new(CopyConverter));
    let job = env
        .service
        .create(env.create_request(MigrationStrategy::FullCopy, 0))
        .await
        .unwrap();
    env.service.enqueue(job.id).await.unwrap();

    // consume only the job-started event so no steps actually run
    let started = env.bus.fetch_event(POLL).await.unwrap().unwrap();
    env.coordinator.handle_event(started).await.unwrap();

    let steps: Vec<_> = env.job(job.id).await.steps().to_vec();
    for step in &steps[..2] {
        env.coordinator
            .handle_event(PipelineEvent::StepCompleted {
                job_id: job.id,
                step_id: step.id,
                step_name: step.name.clone(),
                correlation_id: job.correlation_id,
            })
            .await
            .unwrap();
    }

    let saga = env.sagas.get(job.correlation_id).await.unwrap().unwrap();
    assert_eq!(saga.stage_label(), "UploadArtifact");

    env.coordinator
        .handle_event(PipelineEvent::StepFailed {
            job_id: job.id,
            step_id: steps[2].id,
            step_name: steps[2].name.clone(),
            error: "bucket gone".to_string(),
            will_retry: false,
            correlation_id: job.correlation_id,
        })
        .await
        .unwrap();

    let saga = env.sagas.get(job.correlation_id).await.unwrap().unwrap();
    assert_eq!(saga.status, SagaStatus::Failed);
    assert_eq!(env.job(job.id).await.status, JobStatus::Failed);

    // a late completion does not move the saga out of Failed
    env.coordinator
        .handle_event(PipelineEvent::StepCompleted {
            job_id: job.id,
            step_id: steps[2].id,
            step_name: steps[2].name.clone(),
            correlation_id: job.correlation_id,
        })
        .await
        .unwrap();

    let saga = env.sagas.get(job.correlation_id).await.unwrap().unwrap();
    assert_eq!(saga.status, SagaStatus::Failed);
    assert_eq!(env.job(job.id).await.status, JobStatus::Failed);
}

#[tokio::test]
async fn cancel_request_mid_pipeline_cancels_saga_and_job() {
    // Scenario D: cancel while the saga sits in the import slot
    let env = test_env(Arc::new(CopyConverter));
    let job = env
        .service
        .create(env.create_request(MigrationStrategy::FullCopy, 0))
        .await
        .unwrap();
    env.service.enqueue(job.id).await.unwrap();

    let started = env.bus.fetch_event(POLL).await.unwrap().unwrap();
    env.coordinator.handle_event(started).await.unwrap();

    let steps: Vec<_> = env.job(job.id).await.steps().to_vec();
    for step in &steps[..3] {
        env.coordinator
            .handle_event(PipelineEvent::StepCompleted {
                job_id: job.id,
                step_id: step.id,
                step_name: step.name.clone(),
                correlation_id: job.correlation_id,
            })
            .await
            .unwrap();
    }
    let saga = env.sagas.get(job.correlation_id).await.unwrap().unwrap();
    assert_eq!(saga.stage_label(), "ImportToPve");

    // Running -> Cancelling through the use case, then the saga acts
    env.service.request_cancel(job.id).await.unwrap();
    assert_eq!(env.job(job.id).await.status, JobStatus::Cancelling);

    let cancel_event = env.bus.fetch_event(POLL).await.unwrap().unwrap();
    env.coordinator.handle_event(cancel_event).await.unwrap();

    let saga = env.sagas.get(job.correlation_id).await.unwrap().unwrap();
    assert_eq!(saga.status, SagaStatus::Cancelled);
    assert_eq!(env.job(job.id).await.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn checksum_comparison_is_case_insensitive() {
    // Scenario E, end to end: artifact checksums recorded by the upload
    // step are lowercase hex; verification must also accept uppercase.
    let env = test_env(Arc::new(CopyConverter));
    let job = env
        .service
        .create(env.create_request(MigrationStrategy::FullCopy, 0))
        .await
        .unwrap();
    env.service.enqueue(job.id).await.unwrap();
    env.drive().await;
    assert_eq!(env.job(job.id).await.status, JobStatus::Succeeded);

    let artifact = env
        .artifacts
        .list_by_job(job.id)
        .await
        .unwrap()
        .pop()
        .unwrap();

    // equal-but-differently-cased digests are a match
    assert!(artifact.checksum.matches(&artifact.checksum.value.to_uppercase()));
    // a different digest is not
    assert!(!artifact.checksum.matches("deadbeef"));
}

#[tokio::test]
async fn duplicate_step_completed_events_do_not_double_advance() {
    let env = test_env(Arc::new(CopyConverter));
    let job = env
        .service
        .create(env.create_request(MigrationStrategy::FullCopy, 0))
        .await
        .unwrap();
    env.service.enqueue(job.id).await.unwrap();

    let started = env.bus.fetch_event(POLL).await.unwrap().unwrap();
    env.coordinator.handle_event(started).await.unwrap();

    let steps: Vec<_> = env.job(job.id).await.steps().to_vec();
    let completed = PipelineEvent::StepCompleted {
        job_id: job.id,
        step_id: steps[0].id,
        step_name: steps[0].name.clone(),
        correlation_id: job.correlation_id,
    };

    env.coordinator.handle_event(completed.clone()).await.unwrap();
    let saga = env.sagas.get(job.correlation_id).await.unwrap().unwrap();
    assert_eq!(saga.current_step_index, 1);

    // redelivery of the same event is absorbed
    env.coordinator.handle_event(completed).await.unwrap();
    let saga = env.sagas.get(job.correlation_id).await.unwrap().unwrap();
    assert_eq!(saga.current_step_index, 1);
}

#[tokio::test]
async fn pause_holds_the_pipeline_and_resume_continues_it() {
    let env = test_env(Arc::new(CopyConverter));
    let job = env
        .service
        .create(env.create_request(MigrationStrategy::FullCopy, 0))
        .await
        .unwrap();
    env.service.enqueue(job.id).await.unwrap();

    let started = env.bus.fetch_event(POLL).await.unwrap().unwrap();
    env.coordinator.handle_event(started).await.unwrap();

    env.service.request_pause(job.id).await.unwrap();
    assert_eq!(env.job(job.id).await.status, JobStatus::Pausing);

    // the in-flight step completing while Pausing parks the pipeline
    let steps: Vec<_> = env.job(job.id).await.steps().to_vec();
    env.coordinator
        .handle_event(PipelineEvent::StepCompleted {
            job_id: job.id,
            step_id: steps[0].id,
            step_name: steps[0].name.clone(),
            correlation_id: job.correlation_id,
        })
        .await
        .unwrap();
    assert_eq!(env.job(job.id).await.status, JobStatus::Paused);

    // drain the pending dispatch for step 0 issued at start
    let _ = env.bus.fetch_command(POLL).await.unwrap();

    // resume re-dispatches the held step
    env.service.resume(job.id).await.unwrap();
    let resumed = env.bus.fetch_event(POLL).await.unwrap().unwrap();
    env.coordinator.handle_event(resumed).await.unwrap();

    assert_eq!(env.job(job.id).await.status, JobStatus::Running);
    let held = env.bus.fetch_command(POLL).await.unwrap().unwrap();
    assert_eq!(held.kind(), aldatu_domain::StepKind::ConvertDisk);
}

#[tokio::test]
async fn step_progress_is_monotonic_per_step() {
    let env = test_env(Arc::new(CopyConverter));
    let mut updates = env.notifier.subscribe();

    let job = env
        .service
        .create(env.create_request(MigrationStrategy::FullCopy, 0))
        .await
        .unwrap();
    env.service.enqueue(job.id).await.unwrap();
    env.drive().await;
    assert_eq!(env.job(job.id).await.status, JobStatus::Succeeded);

    let mut per_step: std::collections::HashMap<aldatu_domain::StepId, Vec<u8>> =
        std::collections::HashMap::new();
    while let Ok(update) = updates.try_recv() {
        if let ProgressUpdate::Step {
            step_id, progress, ..
        } = update
        {
            per_step.entry(step_id).or_default().push(progress);
        }
    }

    assert!(!per_step.is_empty());
    for (step_id, series) in per_step {
        assert!(
            series.windows(2).all(|w| w[0] <= w[1]),
            "progress regressed for step {step_id}: {series:?}"
        );
        assert_eq!(series.last(), Some(&100));
    }
}

#[tokio::test]
async fn commands_for_missing_jobs_are_dropped() {
    let env = test_env(Arc::new(CopyConverter));

    let command = aldatu_application::messages::StepCommand::EnableCbt {
        meta: aldatu_application::messages::StepRef {
            job_id: aldatu_domain::JobId::new(),
            step_id: aldatu_domain::StepId::new(),
            correlation_id: aldatu_domain::CorrelationId::new(),
        },
        source_connection_id: ConnectionId::new(),
        vm_id: "vm-101".to_string(),
    };

    env.executor
        .execute(command, CancellationToken::new())
        .await
        .unwrap();

    // no step outcome was published for the stale command
    assert!(env.bus.fetch_event(POLL).await.unwrap().is_none());
}

#[tokio::test]
async fn manual_retry_dispatches_the_failed_step() {
    let env = test_env(Arc::new(BrokenConverter));
    let job = env
        .service
        .create(env.create_request(MigrationStrategy::FullCopy, 0))
        .await
        .unwrap();
    env.service.enqueue(job.id).await.unwrap();
    env.drive().await;

    let failed = env.job(job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    let convert = failed
        .steps()
        .iter()
        .find(|s| s.name == "ConvertDisk")
        .unwrap();
    assert_eq!(convert.status, StepStatus::Failed);

    // max_retries 0 leaves no budget; the operator path refuses too
    let err = env.service.retry_step(job.id, convert.id).await.unwrap_err();
    assert!(err.to_string().contains("retries"));
}
