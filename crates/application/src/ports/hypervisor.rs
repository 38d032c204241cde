//! Source and target hypervisor client contracts.

use crate::progress::ProgressSender;
use aldatu_domain::{ConnectionId, DiskFormat};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A VM as listed by the source hypervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct VmInfo {
    pub id: String,
    pub name: String,
    pub cpu_count: u32,
    pub memory_bytes: u64,
    pub disk_keys: Vec<String>,
}

/// Errors from hypervisor clients
#[derive(Debug, Error)]
pub enum HypervisorError {
    #[error("VM not found: {0}")]
    VmNotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Hypervisor call failed: {0}")]
    Call(String),
}

/// Client for the source hypervisor (vSphere-style, with
/// change-block-tracking support for incremental transfers).
#[async_trait]
pub trait SourceHypervisor: Send + Sync {
    async fn list_vms(&self, connection_id: ConnectionId) -> Result<Vec<VmInfo>, HypervisorError>;

    /// Export one disk into a staged local file; returns bytes written.
    async fn export_disk(
        &self,
        connection_id: ConnectionId,
        vm_id: &str,
        disk_key: &str,
        dest: &Path,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<u64, HypervisorError>;

    async fn is_cbt_enabled(
        &self,
        connection_id: ConnectionId,
        vm_id: &str,
    ) -> Result<bool, HypervisorError>;

    async fn enable_cbt(
        &self,
        connection_id: ConnectionId,
        vm_id: &str,
    ) -> Result<(), HypervisorError>;

    /// Pull the blocks changed since `change_id` into a staged delta
    /// file; returns bytes written.
    async fn pull_changed_blocks(
        &self,
        connection_id: ConnectionId,
        vm_id: &str,
        change_id: &str,
        dest: &Path,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<u64, HypervisorError>;
}

/// Client for the target hypervisor (Proxmox-style).
#[async_trait]
pub trait TargetHypervisor: Send + Sync {
    /// Create a VM shell; returns the hypervisor-assigned numeric id.
    async fn create_vm(
        &self,
        connection_id: ConnectionId,
        name: &str,
        cores: u32,
        memory_mb: u32,
    ) -> Result<u32, HypervisorError>;

    async fn import_disk(
        &self,
        connection_id: ConnectionId,
        vm_id: u32,
        storage_key: &str,
        format: DiskFormat,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<(), HypervisorError>;

    async fn configure_vm(
        &self,
        connection_id: ConnectionId,
        vm_id: u32,
        settings: HashMap<String, String>,
    ) -> Result<(), HypervisorError>;
}
