//! Collaborator contracts consumed by the core. Every port returns a
//! structured result; none of them panics across the boundary.

mod bus;
mod converter;
mod hypervisor;
mod notifications;
mod repositories;
mod storage;

pub use bus::{BusError, MessageBus};
pub use converter::{ConvertError, DiskConverter};
pub use hypervisor::{HypervisorError, SourceHypervisor, TargetHypervisor, VmInfo};
pub use notifications::NotificationSink;
pub use repositories::{
    mutate_job, ArtifactRepository, JobRepository, MutateError, StoreError, Versioned,
};
pub use storage::{ByteStream, StorageAdapter, StorageError, StorageFactory};
