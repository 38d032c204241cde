// Aldatu migration worker
// Compile: cargo build --bin aldatu-worker
// Run: cargo run --bin aldatu-worker

mod runtime;

use aldatu_application::steps::{
    ApplyDeltaPerformer, ConvertDiskPerformer, EnableCbtPerformer, ExportVmdkPerformer,
    FinalSyncCutoverPerformer, ImportToPvePerformer, IncrementalPullPerformer,
    UploadArtifactPerformer, VerifyPerformer,
};
use aldatu_application::ports::{
    ArtifactRepository, DiskConverter, JobRepository, MessageBus, NotificationSink,
    SourceHypervisor, StorageFactory, TargetHypervisor,
};
use aldatu_application::{SagaCoordinator, StepExecutor};
use aldatu_infrastructure::{
    BroadcastNotifier, CancellationRegistry, MemoryArtifactRepository, MemoryJobRepository,
    MockSourceHypervisor, MockTargetHypervisor, QemuImgConverter, TokioMessageBus,
};
use aldatu_saga::{MemorySagaRepository, SagaRepository};
use aldatu_shared::{init_tracing, ConfigLoader};
use runtime::WorkerRuntime;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_file = PathBuf::from(".env");
    let loader = ConfigLoader::new(env_file.exists().then_some(env_file));
    let config = loader.load_worker_config()?;

    init_tracing(&config.log_filter);
    info!("starting aldatu worker");

    // stores and bus
    let jobs: Arc<dyn JobRepository> = Arc::new(MemoryJobRepository::new());
    let artifacts: Arc<dyn ArtifactRepository> = Arc::new(MemoryArtifactRepository::new());
    let sagas: Arc<dyn SagaRepository> = Arc::new(MemorySagaRepository::new());
    let bus: Arc<dyn MessageBus> = Arc::new(TokioMessageBus::new(config.bus_capacity));
    let notifications: Arc<dyn NotificationSink> = Arc::new(BroadcastNotifier::default());

    // collaborators; hypervisor clients are the local mocks until real
    // endpoints are wired in
    let source: Arc<dyn SourceHypervisor> = Arc::new(MockSourceHypervisor::new());
    let target: Arc<dyn TargetHypervisor> = Arc::new(MockTargetHypervisor::new());
    let storage: Arc<dyn StorageFactory> = Arc::new(aldatu_infrastructure::LocalStorageFactory::new());
    let converter: Arc<dyn DiskConverter> =
        Arc::new(QemuImgConverter::with_binary(config.qemu_img_binary.clone()));

    let executor = Arc::new(
        StepExecutor::new(
            Arc::clone(&jobs),
            Arc::clone(&notifications),
            Arc::clone(&bus),
        )
        .with_scratch_root(config.scratch_root.clone())
        .register(Arc::new(ExportVmdkPerformer::new(
            Arc::clone(&source),
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
        .register(Arc::new(ImportToPvePerformer::new(Arc::clone(&target))))
        .register(Arc::new(VerifyPerformer::new(
            Arc::clone(&storage),
            Arc::clone(&artifacts),
        )))
        .register(Arc::new(EnableCbtPerformer::new(Arc::clone(&source))))
        .register(Arc::new(IncrementalPullPerformer::new(
            Arc::clone(&source),
            Arc::clone(&storage),
        )))
        .register(Arc::new(ApplyDeltaPerformer::new(
            Arc::clone(&storage),
            Arc::clone(&artifacts),
        )))
        .register(Arc::new(FinalSyncCutoverPerformer::new(
            Arc::clone(&source),
            Arc::clone(&target),
            Arc::clone(&storage),
            Arc::clone(&artifacts),
        ))),
    );

    let coordinator = Arc::new(SagaCoordinator::new(
        Arc::clone(&sagas),
        Arc::clone(&jobs),
        Arc::clone(&artifacts),
        Arc::clone(&bus),
        Arc::clone(&notifications),
    ));

    let cancellations = Arc::new(CancellationRegistry::new());
    let runtime = Arc::new(WorkerRuntime::new(
        Arc::clone(&bus),
        executor,
        coordinator,
        cancellations,
        config.poll_interval,
    ));

    let shutdown = runtime.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    runtime.run(config.consumer_count).await;
    Ok(())
}
