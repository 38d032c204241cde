//! Broadcast notification sink.
//!
//! Fans progress updates out to any number of subscribers (console,
//! tests, a future websocket push). Delivery is best effort: lagging or
//! dropped receivers lose updates, which the contract allows.

use aldatu_application::ports::NotificationSink;
use aldatu_domain::{JobId, JobStatus, StepId, StepStatus};
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

/// A progress update as seen by observers.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    Job {
        job_id: JobId,
        progress: u8,
        status: JobStatus,
    },
    Step {
        job_id: JobId,
        step_id: StepId,
        progress: u8,
        status: StepStatus,
    },
}

pub struct BroadcastNotifier {
    tx: broadcast::Sender<ProgressUpdate>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl NotificationSink for BroadcastNotifier {
    async fn job_progress(&self, job_id: JobId, progress: u8, status: JobStatus) {
        debug!(%job_id, progress, %status, "job progress");
        let _ = self.tx.send(ProgressUpdate::Job {
            job_id,
            progress,
            status,
        });
    }

    async fn step_progress(&self, job_id: JobId, step_id: StepId, progress: u8, status: StepStatus) {
        debug!(%job_id, %step_id, progress, %status, "step progress");
        let _ = self.tx.send(ProgressUpdate::Step {
            job_id,
            step_id,
            progress,
            status,
        });
    }
}
