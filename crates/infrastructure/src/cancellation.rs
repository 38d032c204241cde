//! Per-job cancellation tokens.
//!
//! The worker registers a token when it starts executing a step for a
//! job; a cancel request trips the token so the in-flight transfer or
//! conversion aborts. Cancellation only stops future work - a side
//! effect that already completed stays completed.

use aldatu_domain::JobId;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: DashMap<JobId, CancellationToken>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for a job, created on first use. Repeated calls for the
    /// same job share one token.
    pub fn token_for(&self, job_id: JobId) -> CancellationToken {
        self.tokens
            .entry(job_id)
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    /// Trip the job's token, aborting whatever is in flight.
    pub fn cancel(&self, job_id: JobId) {
        if let Some(token) = self.tokens.get(&job_id) {
            token.cancel();
        }
    }

    /// Forget a finished job's token.
    pub fn remove(&self, job_id: JobId) {
        self.tokens.remove(&job_id);
    }
}
