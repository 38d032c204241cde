//! Message bus contract: at-least-once delivery of step-dispatch
//! commands and pipeline lifecycle events, correlated per job.

use crate::messages::{PipelineEvent, StepCommand};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors from the message bus
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BusError {
    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Bus is shut down")]
    Closed,
}

/// Publish/consume API in the task-queue style: consumers poll with a
/// timeout and get `None` when nothing arrived in time.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn dispatch(&self, command: StepCommand) -> Result<(), BusError>;

    async fn fetch_command(&self, timeout: Duration) -> Result<Option<StepCommand>, BusError>;

    async fn publish(&self, event: PipelineEvent) -> Result<(), BusError>;

    async fn fetch_event(&self, timeout: Duration) -> Result<Option<PipelineEvent>, BusError>;
}
