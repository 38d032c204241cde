//! # aldatu-saga
//!
//! Per-job saga state for the migration pipeline.
//!
//! A saga record is created when the first `JobStarted` event for a
//! correlation id is observed and acts as the authoritative cursor for
//! "which step is next". Instead of one named state per pipeline stage,
//! the record carries a generic step index into the strategy's step-name
//! list, so FullCopy and Incremental sequences (and any future strategy)
//! map onto the same machinery without borrowing stage names.
//!
//! The decision logic is pure ([`SagaState`] methods return
//! [`SagaDecision`] values); all I/O - loading jobs, dispatching step
//! commands, publishing events - belongs to the coordinator in the
//! application layer.

pub mod repository;
pub mod state;

pub use repository::{MemorySagaRepository, SagaRepository, SagaRepositoryError};
pub use state::{SagaDecision, SagaState, SagaStatus};
