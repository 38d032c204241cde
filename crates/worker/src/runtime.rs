//! Worker runtime: the saga event loop plus a pool of step-command
//! consumers, all polling the bus until shutdown.

use aldatu_application::messages::PipelineEvent;
use aldatu_application::ports::{BusError, MessageBus};
use aldatu_application::{SagaCoordinator, StepExecutor};
use aldatu_infrastructure::CancellationRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct WorkerRuntime {
    bus: Arc<dyn MessageBus>,
    executor: Arc<StepExecutor>,
    coordinator: Arc<SagaCoordinator>,
    cancellations: Arc<CancellationRegistry>,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl WorkerRuntime {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        executor: Arc<StepExecutor>,
        coordinator: Arc<SagaCoordinator>,
        cancellations: Arc<CancellationRegistry>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            bus,
            executor,
            coordinator,
            cancellations,
            poll_interval,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops every loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the saga loop and `consumers` command loops until shutdown.
    pub async fn run(self: Arc<Self>, consumers: usize) {
        let mut handles = Vec::new();

        let saga = Arc::clone(&self);
        handles.push(tokio::spawn(async move { saga.saga_loop().await }));

        for index in 0..consumers.max(1) {
            let worker = Arc::clone(&self);
            handles.push(tokio::spawn(async move { worker.command_loop(index).await }));
        }

        for handle in handles {
            let _ = handle.await;
        }
        info!("worker runtime stopped");
    }

    async fn saga_loop(&self) {
        info!("saga loop started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                fetched = self.bus.fetch_event(self.poll_interval) => match fetched {
                    Ok(Some(event)) => {
                        // trip the in-flight token before the saga acts,
                        // so a running step aborts as soon as possible
                        if let PipelineEvent::JobCancelRequested { job_id, .. } = &event {
                            self.cancellations.cancel(*job_id);
                        }
                        if let Err(err) = self.coordinator.handle_event(event).await {
                            error!(%err, "saga event handling failed");
                        }
                    }
                    Ok(None) => {}
                    Err(BusError::Closed) => break,
                    Err(err) => error!(%err, "event fetch failed"),
                },
            }
        }
        info!("saga loop stopped");
    }

    async fn command_loop(&self, index: usize) {
        info!(index, "step consumer started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                fetched = self.bus.fetch_command(self.poll_interval) => match fetched {
                    Ok(Some(command)) => {
                        let job_id = command.meta().job_id;
                        let token = self.cancellations.token_for(job_id);
                        if let Err(err) = self.executor.execute(command, token).await {
                            error!(%err, %job_id, "step execution failed");
                        }
                    }
                    Ok(None) => {}
                    Err(BusError::Closed) => break,
                    Err(err) => error!(%err, "command fetch failed"),
                },
            }
        }
        info!(index, "step consumer stopped");
    }
}
