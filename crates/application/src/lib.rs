//! # aldatu-application
//!
//! Application layer of the Aldatu migration orchestrator:
//!
//! - [`ports`]: contracts for every external collaborator (stores,
//!   object storage, hypervisor clients, the disk converter, the
//!   notification sink and the message bus)
//! - [`messages`]: step-dispatch commands and pipeline lifecycle events
//! - [`executor`]: the five-phase step-execution protocol shared by all
//!   step kinds, parameterized by [`executor::StepPerformer`]
//! - [`steps`]: one performer per step kind
//! - [`coordinator`]: the saga coordinator that sequences step dispatch
//!   from asynchronous outcome events
//! - [`service`]: job lifecycle use cases (create, enqueue, pause,
//!   resume, cancel, manual retry, queries)

pub mod coordinator;
pub mod executor;
pub mod keys;
pub mod messages;
pub mod ports;
pub mod progress;
pub mod service;
pub mod steps;

pub use coordinator::{CoordinatorError, SagaCoordinator};
pub use executor::{ExecutorError, PerformError, StepContext, StepExecutor, StepPerformer};
pub use messages::{PipelineEvent, StepCommand, StepRef};
pub use progress::ProgressSender;
pub use service::{CreateJobRequest, JobService, ServiceError};
