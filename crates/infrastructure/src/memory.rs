//! In-memory stores for in-process deployments and tests.
//!
//! The job store keeps a version counter per aggregate and rejects
//! stale writes, which is what protects concurrent executors against
//! overwriting each other.

use aldatu_application::ports::{
    ArtifactRepository, JobRepository, StoreError, Versioned,
};
use aldatu_domain::{Artifact, ArtifactId, CorrelationId, JobId, JobStatus, MigrationJob};
use async_trait::async_trait;
use dashmap::DashMap;

/// DashMap-backed job store with optimistic concurrency.
#[derive(Debug, Default)]
pub struct MemoryJobRepository {
    jobs: DashMap<JobId, Versioned<MigrationJob>>,
    by_correlation: DashMap<CorrelationId, JobId>,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn get(&self, id: JobId) -> Result<Option<Versioned<MigrationJob>>, StoreError> {
        Ok(self.jobs.get(&id).map(|e| e.value().clone()))
    }

    async fn find_by_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Option<Versioned<MigrationJob>>, StoreError> {
        let Some(job_id) = self.by_correlation.get(&correlation_id).map(|e| *e.value()) else {
            return Ok(None);
        };
        self.get(job_id).await
    }

    async fn add(&self, job: &MigrationJob) -> Result<(), StoreError> {
        if self.jobs.contains_key(&job.id) {
            return Err(StoreError::Backend(format!(
                "job {} already exists",
                job.id
            )));
        }
        self.by_correlation.insert(job.correlation_id, job.id);
        self.jobs.insert(job.id, Versioned::new(job.clone(), 1));
        Ok(())
    }

    async fn update(&self, job: &MigrationJob, expected_version: u64) -> Result<u64, StoreError> {
        let mut entry = self
            .jobs
            .get_mut(&job.id)
            .ok_or(StoreError::JobNotFound(job.id))?;

        if entry.version != expected_version {
            return Err(StoreError::Conflict {
                job_id: job.id,
                expected: expected_version,
                actual: entry.version,
            });
        }

        let next = expected_version + 1;
        *entry.value_mut() = Versioned::new(job.clone(), next);
        Ok(next)
    }

    async fn list(
        &self,
        offset: usize,
        limit: usize,
        status: Option<JobStatus>,
    ) -> Result<Vec<MigrationJob>, StoreError> {
        let mut jobs: Vec<MigrationJob> = self
            .jobs
            .iter()
            .map(|e| e.value().value.clone())
            .filter(|j| status.map_or(true, |s| j.status == s))
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self, status: Option<JobStatus>) -> Result<usize, StoreError> {
        Ok(self
            .jobs
            .iter()
            .filter(|e| status.map_or(true, |s| e.value().value.status == s))
            .count())
    }
}

/// DashMap-backed artifact store.
#[derive(Debug, Default)]
pub struct MemoryArtifactRepository {
    artifacts: DashMap<ArtifactId, Artifact>,
}

impl MemoryArtifactRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactRepository for MemoryArtifactRepository {
    async fn add(&self, artifact: &Artifact) -> Result<(), StoreError> {
        self.artifacts.insert(artifact.id, artifact.clone());
        Ok(())
    }

    async fn get(&self, id: ArtifactId) -> Result<Option<Artifact>, StoreError> {
        Ok(self.artifacts.get(&id).map(|e| e.value().clone()))
    }

    async fn list_by_job(&self, job_id: JobId) -> Result<Vec<Artifact>, StoreError> {
        let mut artifacts: Vec<Artifact> = self
            .artifacts
            .iter()
            .map(|e| e.value().clone())
            .filter(|a| a.job_id == job_id)
            .collect();
        artifacts.sort_by_key(|a| a.created_at);
        Ok(artifacts)
    }

    async fn count_by_job(&self, job_id: JobId) -> Result<usize, StoreError> {
        Ok(self
            .artifacts
            .iter()
            .filter(|e| e.value().job_id == job_id)
            .count())
    }

    async fn delete(&self, id: ArtifactId) -> Result<(), StoreError> {
        self.artifacts
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::ArtifactNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aldatu_domain::{
        Checksum, ConnectionId, DiskFormat, MigrationOptions, MigrationStrategy, StorageTarget,
        VmSpec,
    };

    fn job() -> MigrationJob {
        MigrationJob::with_planned_steps(
            ConnectionId::new(),
            ConnectionId::new(),
            VmSpec::new("vm-101", "web-server-01", "disk-0", 4, 8192),
            StorageTarget::local("/tmp/aldatu-mem-test"),
            MigrationStrategy::FullCopy,
            MigrationOptions::default(),
        )
    }

    #[tokio::test]
    async fn add_and_get_round_trip() {
        let repo = MemoryJobRepository::new();
        let job = job();
        repo.add(&job).await.unwrap();

        let loaded = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.value.id, job.id);

        let by_corr = repo
            .find_by_correlation(job.correlation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_corr.value.id, job.id);
    }

    #[tokio::test]
    async fn update_bumps_version() {
        let repo = MemoryJobRepository::new();
        let mut job = job();
        repo.add(&job).await.unwrap();

        job.enqueue().unwrap();
        let v2 = repo.update(&job, 1).await.unwrap();
        assert_eq!(v2, 2);
    }

    #[tokio::test]
    async fn stale_write_is_a_conflict() {
        let repo = MemoryJobRepository::new();
        let mut job = job();
        repo.add(&job).await.unwrap();

        job.enqueue().unwrap();
        repo.update(&job, 1).await.unwrap();

        // a second writer still holding version 1
        let err = repo.update(&job, 1).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let repo = MemoryJobRepository::new();
        let created = job();
        let mut queued = job();
        repo.add(&created).await.unwrap();
        queued.enqueue().unwrap();
        repo.add(&queued).await.unwrap();

        let all = repo.list(0, 10, None).await.unwrap();
        assert_eq!(all.len(), 2);

        let queued_only = repo.list(0, 10, Some(JobStatus::Queued)).await.unwrap();
        assert_eq!(queued_only.len(), 1);
        assert_eq!(repo.count(Some(JobStatus::Created)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn artifacts_are_scoped_by_job() {
        let repo = MemoryArtifactRepository::new();
        let job_id = JobId::new();
        let other_job = JobId::new();

        for name in ["a.qcow2", "b.qcow2"] {
            let artifact = Artifact::new(
                job_id,
                name,
                DiskFormat::Qcow2,
                Checksum::sha256("00"),
                1,
                format!("jobs/{job_id}/{name}"),
            );
            repo.add(&artifact).await.unwrap();
        }
        let stray = Artifact::new(
            other_job,
            "c.qcow2",
            DiskFormat::Qcow2,
            Checksum::sha256("00"),
            1,
            "elsewhere",
        );
        repo.add(&stray).await.unwrap();

        assert_eq!(repo.count_by_job(job_id).await.unwrap(), 2);
        assert_eq!(repo.list_by_job(job_id).await.unwrap().len(), 2);

        repo.delete(stray.id).await.unwrap();
        assert!(repo.get(stray.id).await.unwrap().is_none());
        assert!(repo.delete(stray.id).await.is_err());
    }
}
