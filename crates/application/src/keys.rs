//! Storage key layout shared by the coordinator (which builds dispatch
//! payloads) and the performers (which stage intermediate objects).

use aldatu_domain::{DiskFormat, JobId};

/// Raw export of one source disk.
pub fn export_key(job_id: JobId, disk_key: &str) -> String {
    format!("jobs/{job_id}/export/{disk_key}.vmdk")
}

/// Converted image in the target format.
pub fn converted_key(job_id: JobId, format: DiskFormat) -> String {
    format!("jobs/{job_id}/converted/disk.{format}")
}

/// Final artifact object.
pub fn artifact_key(job_id: JobId, format: DiskFormat) -> String {
    format!("jobs/{job_id}/artifact/disk.{format}")
}

/// Synchronised base image maintained by the incremental pipeline.
pub fn base_key(job_id: JobId, format: DiskFormat) -> String {
    format!("jobs/{job_id}/base.{format}")
}

/// One pulled delta, named after the change id that produced it.
pub fn delta_key(job_id: JobId, change_id: &str) -> String {
    let safe: String = change_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("jobs/{job_id}/deltas/{safe}.bin")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped_to_the_job() {
        let job_id = JobId::new();
        assert!(export_key(job_id, "disk-0").contains(&job_id.to_string()));
        assert!(export_key(job_id, "disk-0").ends_with("disk-0.vmdk"));
        assert!(converted_key(job_id, DiskFormat::Qcow2).ends_with("disk.qcow2"));
    }

    #[test]
    fn delta_key_sanitises_change_ids() {
        let job_id = JobId::new();
        // change ids contain spaces, dots and slashes
        let key = delta_key(job_id, "52 de..7c/1");
        let file_name = key.rsplit('/').next().unwrap();
        assert_eq!(file_name, "52_de__7c_1.bin");
    }
}
