//! Progress notification contract. Fire-and-forget: the core requires
//! no delivery guarantee and ignores sink failures.

use aldatu_domain::{JobId, JobStatus, StepId, StepStatus};
use async_trait::async_trait;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn job_progress(&self, job_id: JobId, progress: u8, status: JobStatus);

    async fn step_progress(&self, job_id: JobId, step_id: StepId, progress: u8, status: StepStatus);
}
