//! Deterministic mock hypervisor clients for local mode and tests.
//!
//! The source client serves a fixed VM inventory and synthesises disk
//! content from the VM and disk identifiers, so exports are repeatable
//! across runs. The target client hands out sequential VM ids and
//! records every call for assertions.

use aldatu_application::ports::{
    HypervisorError, SourceHypervisor, TargetHypervisor, VmInfo,
};
use aldatu_application::progress::ProgressSender;
use aldatu_domain::{ConnectionId, DiskFormat};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const EXPORT_SIZE: usize = 256 * 1024;
const DELTA_SIZE: usize = 64 * 1024;

#[derive(Debug, Default)]
pub struct MockSourceHypervisor {
    cbt_enabled: DashMap<String, bool>,
}

impl MockSourceHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn inventory() -> Vec<VmInfo> {
        vec![
            VmInfo {
                id: "vm-101".to_string(),
                name: "web-server-01".to_string(),
                cpu_count: 4,
                memory_bytes: 8 * 1024 * 1024 * 1024,
                disk_keys: vec!["disk-0".to_string()],
            },
            VmInfo {
                id: "vm-102".to_string(),
                name: "db-server-01".to_string(),
                cpu_count: 8,
                memory_bytes: 16 * 1024 * 1024 * 1024,
                disk_keys: vec!["disk-0".to_string(), "disk-1".to_string()],
            },
            VmInfo {
                id: "vm-103".to_string(),
                name: "app-server-01".to_string(),
                cpu_count: 2,
                memory_bytes: 4 * 1024 * 1024 * 1024,
                disk_keys: vec!["disk-0".to_string()],
            },
        ]
    }
}

/// Repeatable pseudo-content derived from a seed string.
fn synthetic_bytes(seed: &str, len: usize) -> Vec<u8> {
    let mut state: u64 = seed.bytes().fold(0xcbf29ce484222325, |acc, b| {
        (acc ^ b as u64).wrapping_mul(0x100000001b3)
    });
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        out.extend_from_slice(&state.to_le_bytes());
    }
    out.truncate(len);
    out
}

async fn write_in_chunks(
    dest: &Path,
    bytes: &[u8],
    progress: &ProgressSender,
    cancel: &CancellationToken,
) -> Result<u64, HypervisorError> {
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| HypervisorError::Call(e.to_string()))?;

    let chunks: Vec<&[u8]> = bytes.chunks(bytes.len().div_ceil(4).max(1)).collect();
    let total = chunks.len();
    for (i, chunk) in chunks.into_iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(HypervisorError::Cancelled);
        }
        file.write_all(chunk)
            .await
            .map_err(|e| HypervisorError::Call(e.to_string()))?;
        progress.report(((i + 1) * 100 / total) as u8).await;
    }
    file.flush()
        .await
        .map_err(|e| HypervisorError::Call(e.to_string()))?;
    Ok(bytes.len() as u64)
}

#[async_trait]
impl SourceHypervisor for MockSourceHypervisor {
    async fn list_vms(&self, _connection_id: ConnectionId) -> Result<Vec<VmInfo>, HypervisorError> {
        Ok(Self::inventory())
    }

    async fn export_disk(
        &self,
        _connection_id: ConnectionId,
        vm_id: &str,
        disk_key: &str,
        dest: &Path,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<u64, HypervisorError> {
        if !Self::inventory().iter().any(|vm| vm.id == vm_id) {
            return Err(HypervisorError::VmNotFound(vm_id.to_string()));
        }
        let bytes = synthetic_bytes(&format!("{vm_id}/{disk_key}"), EXPORT_SIZE);
        debug!(vm_id, disk_key, "serving synthetic export");
        write_in_chunks(dest, &bytes, progress, cancel).await
    }

    async fn is_cbt_enabled(
        &self,
        _connection_id: ConnectionId,
        vm_id: &str,
    ) -> Result<bool, HypervisorError> {
        Ok(self
            .cbt_enabled
            .get(vm_id)
            .map(|e| *e.value())
            .unwrap_or(false))
    }

    async fn enable_cbt(
        &self,
        _connection_id: ConnectionId,
        vm_id: &str,
    ) -> Result<(), HypervisorError> {
        if !Self::inventory().iter().any(|vm| vm.id == vm_id) {
            return Err(HypervisorError::VmNotFound(vm_id.to_string()));
        }
        self.cbt_enabled.insert(vm_id.to_string(), true);
        Ok(())
    }

    async fn pull_changed_blocks(
        &self,
        _connection_id: ConnectionId,
        vm_id: &str,
        change_id: &str,
        dest: &Path,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<u64, HypervisorError> {
        let size = if change_id == "*" { EXPORT_SIZE } else { DELTA_SIZE };
        let bytes = synthetic_bytes(&format!("{vm_id}@{change_id}"), size);
        debug!(vm_id, change_id, "serving synthetic delta");
        write_in_chunks(dest, &bytes, progress, cancel).await
    }
}

/// One VM the mock target knows about.
#[derive(Debug, Clone, Default)]
pub struct CreatedVm {
    pub name: String,
    pub cores: u32,
    pub memory_mb: u32,
    pub imported_disks: Vec<String>,
    pub settings: HashMap<String, String>,
}

#[derive(Debug)]
pub struct MockTargetHypervisor {
    next_vm_id: AtomicU32,
    vms: DashMap<u32, CreatedVm>,
}

impl MockTargetHypervisor {
    pub fn new() -> Self {
        Self {
            next_vm_id: AtomicU32::new(200),
            vms: DashMap::new(),
        }
    }

    /// Snapshot of a created VM, for assertions.
    pub fn vm(&self, vm_id: u32) -> Option<CreatedVm> {
        self.vms.get(&vm_id).map(|e| e.value().clone())
    }

    pub fn created_count(&self) -> usize {
        self.vms.len()
    }
}

impl Default for MockTargetHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TargetHypervisor for MockTargetHypervisor {
    async fn create_vm(
        &self,
        _connection_id: ConnectionId,
        name: &str,
        cores: u32,
        memory_mb: u32,
    ) -> Result<u32, HypervisorError> {
        let vm_id = self.next_vm_id.fetch_add(1, Ordering::SeqCst);
        self.vms.insert(
            vm_id,
            CreatedVm {
                name: name.to_string(),
                cores,
                memory_mb,
                imported_disks: Vec::new(),
                settings: HashMap::new(),
            },
        );
        Ok(vm_id)
    }

    async fn import_disk(
        &self,
        _connection_id: ConnectionId,
        vm_id: u32,
        storage_key: &str,
        _format: DiskFormat,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<(), HypervisorError> {
        if cancel.is_cancelled() {
            return Err(HypervisorError::Cancelled);
        }
        let mut vm = self
            .vms
            .get_mut(&vm_id)
            .ok_or(HypervisorError::VmNotFound(vm_id.to_string()))?;
        vm.imported_disks.push(storage_key.to_string());
        progress.report(100).await;
        Ok(())
    }

    async fn configure_vm(
        &self,
        _connection_id: ConnectionId,
        vm_id: u32,
        settings: HashMap<String, String>,
    ) -> Result<(), HypervisorError> {
        let mut vm = self
            .vms
            .get_mut(&vm_id)
            .ok_or(HypervisorError::VmNotFound(vm_id.to_string()))?;
        vm.settings.extend(settings);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_content_is_deterministic() {
        assert_eq!(synthetic_bytes("vm-101/disk-0", 64), synthetic_bytes("vm-101/disk-0", 64));
        assert_ne!(synthetic_bytes("vm-101/disk-0", 64), synthetic_bytes("vm-102/disk-0", 64));
    }

    #[tokio::test]
    async fn export_writes_the_disk_and_reports_progress() {
        let source = MockSourceHypervisor::new();
        let dest = std::env::temp_dir().join(format!("aldatu-export-{}", uuid::Uuid::new_v4()));
        let (progress, mut rx) = ProgressSender::channel(16);
        let cancel = CancellationToken::new();

        let bytes = source
            .export_disk(ConnectionId::new(), "vm-101", "disk-0", &dest, &progress, &cancel)
            .await
            .unwrap();
        assert_eq!(bytes, EXPORT_SIZE as u64);
        assert_eq!(tokio::fs::metadata(&dest).await.unwrap().len(), bytes);

        let mut reports = Vec::new();
        while let Ok(v) = rx.try_recv() {
            reports.push(v);
        }
        assert_eq!(reports.last(), Some(&100));
        // non-decreasing
        assert!(reports.windows(2).all(|w| w[0] <= w[1]));

        let _ = tokio::fs::remove_file(&dest).await;
    }

    #[tokio::test]
    async fn unknown_vm_is_rejected() {
        let source = MockSourceHypervisor::new();
        let dest = std::env::temp_dir().join("aldatu-export-unknown");
        let (progress, _rx) = ProgressSender::channel(4);
        let cancel = CancellationToken::new();

        let err = source
            .export_disk(ConnectionId::new(), "vm-999", "disk-0", &dest, &progress, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, HypervisorError::VmNotFound(_)));
    }

    #[tokio::test]
    async fn cbt_toggles_per_vm() {
        let source = MockSourceHypervisor::new();
        let conn = ConnectionId::new();
        assert!(!source.is_cbt_enabled(conn, "vm-101").await.unwrap());
        source.enable_cbt(conn, "vm-101").await.unwrap();
        assert!(source.is_cbt_enabled(conn, "vm-101").await.unwrap());
        assert!(!source.is_cbt_enabled(conn, "vm-102").await.unwrap());
    }

    #[tokio::test]
    async fn cancelled_export_stops() {
        let source = MockSourceHypervisor::new();
        let dest = std::env::temp_dir().join(format!("aldatu-export-{}", uuid::Uuid::new_v4()));
        let (progress, _rx) = ProgressSender::channel(16);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = source
            .export_disk(ConnectionId::new(), "vm-101", "disk-0", &dest, &progress, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, HypervisorError::Cancelled));
        let _ = tokio::fs::remove_file(&dest).await;
    }

    #[tokio::test]
    async fn target_assigns_sequential_ids_and_records_calls() {
        let target = MockTargetHypervisor::new();
        let conn = ConnectionId::new();
        let (progress, _rx) = ProgressSender::channel(4);
        let cancel = CancellationToken::new();

        let a = target.create_vm(conn, "web-server-01", 4, 8192).await.unwrap();
        let b = target.create_vm(conn, "db-server-01", 8, 16384).await.unwrap();
        assert_eq!(b, a + 1);

        target
            .import_disk(conn, a, "jobs/x/disk.qcow2", DiskFormat::Qcow2, &progress, &cancel)
            .await
            .unwrap();
        let mut settings = HashMap::new();
        settings.insert("onboot".to_string(), "1".to_string());
        target.configure_vm(conn, a, settings).await.unwrap();

        let vm = target.vm(a).unwrap();
        assert_eq!(vm.imported_disks, vec!["jobs/x/disk.qcow2"]);
        assert_eq!(vm.settings.get("onboot").map(String::as_str), Some("1"));
    }
}
