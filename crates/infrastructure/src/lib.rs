//! # aldatu-infrastructure
//!
//! Adapter implementations behind the application ports:
//!
//! - [`memory`]: DashMap-backed job and artifact stores with optimistic
//!   version checking
//! - [`bus`]: in-process Tokio message bus
//! - [`storage`]: local-filesystem object storage with SHA-256 checksums
//! - [`convert`]: `qemu-img` process wrapper with line-oriented progress
//!   parsing
//! - [`clients`]: deterministic mock hypervisor clients for local mode
//!   and tests
//! - [`notify`]: broadcast-channel notification sink
//! - [`cancellation`]: per-job cancellation token registry

pub mod bus;
pub mod cancellation;
pub mod clients;
pub mod convert;
pub mod memory;
pub mod notify;
pub mod storage;

pub use bus::TokioMessageBus;
pub use cancellation::CancellationRegistry;
pub use clients::{CreatedVm, MockSourceHypervisor, MockTargetHypervisor};
pub use convert::QemuImgConverter;
pub use memory::{MemoryArtifactRepository, MemoryJobRepository};
pub use notify::{BroadcastNotifier, ProgressUpdate};
pub use storage::{LocalStorageAdapter, LocalStorageFactory};
