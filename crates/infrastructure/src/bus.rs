//! In-process message bus over Tokio channels.
//!
//! Commands and events travel on separate queues so the step workers
//! and the saga loop can poll independently. Delivery is effectively
//! exactly-once in process; tests that exercise at-least-once semantics
//! inject their duplicates explicitly.

use aldatu_application::messages::{PipelineEvent, StepCommand};
use aldatu_application::ports::{BusError, MessageBus};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Bounded two-queue bus.
pub struct TokioMessageBus {
    command_tx: mpsc::Sender<StepCommand>,
    command_rx: Mutex<mpsc::Receiver<StepCommand>>,
    event_tx: mpsc::Sender<PipelineEvent>,
    event_rx: Mutex<mpsc::Receiver<PipelineEvent>>,
    closed: AtomicBool,
}

impl TokioMessageBus {
    pub fn new(capacity: usize) -> Self {
        let (command_tx, command_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        Self {
            command_tx,
            command_rx: Mutex::new(command_rx),
            event_tx,
            event_rx: Mutex::new(event_rx),
            closed: AtomicBool::new(false),
        }
    }

    /// Stop accepting new messages. In-flight ones can still be fetched.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Default for TokioMessageBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl MessageBus for TokioMessageBus {
    async fn dispatch(&self, command: StepCommand) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        self.command_tx
            .send(command)
            .await
            .map_err(|e| BusError::Publish(e.to_string()))
    }

    async fn fetch_command(&self, timeout: Duration) -> Result<Option<StepCommand>, BusError> {
        let mut rx = self.command_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(command)) => Ok(Some(command)),
            Ok(None) => Err(BusError::Closed),
            Err(_) => Ok(None),
        }
    }

    async fn publish(&self, event: PipelineEvent) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        self.event_tx
            .send(event)
            .await
            .map_err(|e| BusError::Publish(e.to_string()))
    }

    async fn fetch_event(&self, timeout: Duration) -> Result<Option<PipelineEvent>, BusError> {
        let mut rx = self.event_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(event)) => Ok(Some(event)),
            Ok(None) => Err(BusError::Closed),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aldatu_domain::{CorrelationId, JobId};

    #[tokio::test]
    async fn events_round_trip() {
        let bus = TokioMessageBus::default();
        let event = PipelineEvent::JobCancelRequested {
            job_id: JobId::new(),
            correlation_id: CorrelationId::new(),
        };
        bus.publish(event.clone()).await.unwrap();

        let fetched = bus
            .fetch_event(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched, event);
    }

    #[tokio::test]
    async fn fetch_times_out_when_empty() {
        let bus = TokioMessageBus::default();
        let fetched = bus.fetch_command(Duration::from_millis(50)).await.unwrap();
        assert!(fetched.is_none());
    }

    #[tokio::test]
    async fn shutdown_rejects_new_messages() {
        let bus = TokioMessageBus::default();
        bus.shutdown();
        let err = bus
            .publish(PipelineEvent::JobResumed {
                job_id: JobId::new(),
                correlation_id: CorrelationId::new(),
            })
            .await
            .unwrap_err();
        assert_eq!(err, BusError::Closed);
    }

    #[tokio::test]
    async fn commands_are_fifo() {
        let bus = TokioMessageBus::default();
        let meta = |_: u32| aldatu_application::messages::StepRef {
            job_id: JobId::new(),
            step_id: aldatu_domain::StepId::new(),
            correlation_id: CorrelationId::new(),
        };
        let first = StepCommand::EnableCbt {
            meta: meta(0),
            source_connection_id: aldatu_domain::ConnectionId::new(),
            vm_id: "vm-1".into(),
        };
        let second = StepCommand::EnableCbt {
            meta: meta(1),
            source_connection_id: aldatu_domain::ConnectionId::new(),
            vm_id: "vm-2".into(),
        };
        bus.dispatch(first.clone()).await.unwrap();
        bus.dispatch(second.clone()).await.unwrap();

        let a = bus
            .fetch_command(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        let b = bus
            .fetch_command(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(a, first);
        assert_eq!(b, second);
    }
}
