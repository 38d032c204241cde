// Source VM descriptor captured at job creation

use serde::{Deserialize, Serialize};

/// Identity and shape of the VM being migrated, as reported by the
/// source hypervisor when the job was created. Dispatch payloads are
/// built from this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmSpec {
    /// Source hypervisor VM identifier (e.g. "vm-101")
    pub vm_id: String,
    /// Display name, reused for the target VM
    pub name: String,
    /// Key of the disk to migrate
    pub disk_key: String,
    pub cores: u32,
    pub memory_mb: u32,
}

impl VmSpec {
    pub fn new(
        vm_id: impl Into<String>,
        name: impl Into<String>,
        disk_key: impl Into<String>,
        cores: u32,
        memory_mb: u32,
    ) -> Self {
        Self {
            vm_id: vm_id.into(),
            name: name.into(),
            disk_key: disk_key.into(),
            cores,
            memory_mb,
        }
    }
}
