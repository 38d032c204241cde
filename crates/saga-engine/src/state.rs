//! Saga state record and its transition rules.

use aldatu_domain::{CorrelationId, JobId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one saga instance.
///
/// `Running` covers every pipeline position; the position itself is the
/// step index. The three terminal states absorb all further events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SagaStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SagaStatus::Running)
    }
}

impl fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SagaStatus::Running => write!(f, "RUNNING"),
            SagaStatus::Completed => write!(f, "COMPLETED"),
            SagaStatus::Failed => write!(f, "FAILED"),
            SagaStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// What the coordinator should do after a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaDecision {
    /// Dispatch the step at this index.
    DispatchStep(usize),
    /// Re-dispatch the step at this index (it failed with retry budget).
    RedispatchStep(usize),
    /// Every step completed; finalize the job as succeeded.
    FinalizeSuccess,
    /// The pipeline failed terminally; finalize the job as failed.
    FinalizeFailure { error: String },
    /// Cancellation was requested; finalize the job as cancelled.
    FinalizeCancellation,
    /// Hold the cursor without dispatching (pause observed).
    Hold,
    /// The event was a duplicate or arrived in a terminal state.
    Ignore,
}

/// Per-job orchestration record, keyed by correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaState {
    pub correlation_id: CorrelationId,
    pub job_id: JobId,
    pub status: SagaStatus,
    pub current_step_index: usize,
    pub step_names: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaState {
    /// Create the record from a job-started event: cursor at step 0.
    pub fn start(
        correlation_id: CorrelationId,
        job_id: JobId,
        step_names: Vec<String>,
    ) -> (Self, SagaDecision) {
        let now = Utc::now();
        let mut state = Self {
            correlation_id,
            job_id,
            status: SagaStatus::Running,
            current_step_index: 0,
            step_names,
            created_at: now,
            updated_at: now,
        };
        let decision = if state.step_names.is_empty() {
            // A job with no steps has nothing to run.
            state.status = SagaStatus::Completed;
            SagaDecision::FinalizeSuccess
        } else {
            SagaDecision::DispatchStep(0)
        };
        (state, decision)
    }

    /// Human-readable label for the current position, e.g. "UploadArtifact".
    pub fn stage_label(&self) -> &str {
        self.step_names
            .get(self.current_step_index)
            .map(String::as_str)
            .unwrap_or("<done>")
    }

    /// The step name expected to complete next, if any.
    pub fn expected_step(&self) -> Option<&str> {
        self.step_names
            .get(self.current_step_index)
            .map(String::as_str)
    }

    /// Apply a step-completed event.
    ///
    /// Duplicate deliveries are detected by name: under at-least-once
    /// delivery the same completion can arrive twice, and only an event
    /// matching the step at the cursor advances it. `hold` is set when
    /// the job is pausing and the next step must not be dispatched.
    pub fn on_step_completed(&mut self, step_name: &str, hold: bool) -> SagaDecision {
        if self.status.is_terminal() {
            return SagaDecision::Ignore;
        }

        match self.expected_step() {
            Some(expected) if expected == step_name => {}
            _ => return SagaDecision::Ignore,
        }

        self.current_step_index += 1;
        self.touch();

        if self.current_step_index >= self.step_names.len() {
            self.status = SagaStatus::Completed;
            return SagaDecision::FinalizeSuccess;
        }

        if hold {
            SagaDecision::Hold
        } else {
            SagaDecision::DispatchStep(self.current_step_index)
        }
    }

    /// Apply a step-failed event. A failure with retry budget keeps the
    /// cursor in place and asks for a redispatch; otherwise the saga is
    /// terminally failed.
    pub fn on_step_failed(&mut self, step_name: &str, error: &str, will_retry: bool) -> SagaDecision {
        if self.status.is_terminal() {
            return SagaDecision::Ignore;
        }

        match self.expected_step() {
            Some(expected) if expected == step_name => {}
            _ => return SagaDecision::Ignore,
        }

        self.touch();

        if will_retry {
            return SagaDecision::RedispatchStep(self.current_step_index);
        }

        self.status = SagaStatus::Failed;
        SagaDecision::FinalizeFailure {
            error: error.to_string(),
        }
    }

    /// Apply a cancel-requested event.
    pub fn on_cancel_requested(&mut self) -> SagaDecision {
        if self.status.is_terminal() {
            return SagaDecision::Ignore;
        }
        self.status = SagaStatus::Cancelled;
        self.touch();
        SagaDecision::FinalizeCancellation
    }

    /// Apply a job-resumed event: dispatch the step the cursor is
    /// holding on.
    pub fn on_resumed(&mut self) -> SagaDecision {
        if self.status.is_terminal() {
            return SagaDecision::Ignore;
        }
        if self.current_step_index >= self.step_names.len() {
            return SagaDecision::Ignore;
        }
        self.touch();
        SagaDecision::DispatchStep(self.current_step_index)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
