//! Job and artifact store contracts.
//!
//! The job store is versioned: every read hands back the version it
//! saw, every write names the version it expects, and a stale write is
//! rejected with [`StoreError::Conflict`]. The aggregate (job plus
//! steps) round-trips whole; no partial-field updates exist.

use aldatu_domain::{
    Artifact, ArtifactId, CorrelationId, DomainError, JobId, JobStatus, MigrationJob,
};
use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Errors from the persistence ports
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(ArtifactId),

    #[error("Stale write for job {job_id}: expected version {expected}, found {actual}")]
    Conflict {
        job_id: JobId,
        expected: u64,
        actual: u64,
    },

    #[error("Store failure: {0}")]
    Backend(String),
}

/// A value paired with the store version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: u64) -> Self {
        Self { value, version }
    }
}

/// Whole-aggregate job store.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn get(&self, id: JobId) -> Result<Option<Versioned<MigrationJob>>, StoreError>;

    async fn find_by_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Option<Versioned<MigrationJob>>, StoreError>;

    async fn add(&self, job: &MigrationJob) -> Result<(), StoreError>;

    /// Replace the aggregate if `expected_version` still matches;
    /// returns the new version.
    async fn update(&self, job: &MigrationJob, expected_version: u64) -> Result<u64, StoreError>;

    async fn list(
        &self,
        offset: usize,
        limit: usize,
        status: Option<JobStatus>,
    ) -> Result<Vec<MigrationJob>, StoreError>;

    async fn count(&self, status: Option<JobStatus>) -> Result<usize, StoreError>;
}

/// Artifact store. Artifacts are immutable; there is no update.
#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    async fn add(&self, artifact: &Artifact) -> Result<(), StoreError>;
    async fn get(&self, id: ArtifactId) -> Result<Option<Artifact>, StoreError>;
    async fn list_by_job(&self, job_id: JobId) -> Result<Vec<Artifact>, StoreError>;
    async fn count_by_job(&self, job_id: JobId) -> Result<usize, StoreError>;
    async fn delete(&self, id: ArtifactId) -> Result<(), StoreError>;
}

/// Failure of a load-mutate-persist cycle.
#[derive(Debug, Error)]
pub enum MutateError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Load the job, apply the mutation and persist it back, retrying a
/// bounded number of times when another writer got in between. Returns
/// `None` when the job does not exist.
pub async fn mutate_job<F>(
    repo: &dyn JobRepository,
    job_id: JobId,
    mut apply: F,
) -> Result<Option<MigrationJob>, MutateError>
where
    F: FnMut(&mut MigrationJob) -> Result<(), DomainError>,
{
    const ATTEMPTS: u32 = 3;
    let mut conflict = StoreError::Backend("conflict retry exhausted".to_string());

    for _ in 0..ATTEMPTS {
        let Some(Versioned { value: mut job, version }) = repo.get(job_id).await? else {
            return Ok(None);
        };
        apply(&mut job)?;
        // drain first: events belonging to a write that never lands must
        // not be published
        let events = job.drain_events();
        match repo.update(&job, version).await {
            Ok(_) => {
                for event in events {
                    debug!(job_id = %job_id, ?event, "domain event");
                }
                return Ok(Some(job));
            }
            Err(StoreError::Conflict {
                job_id,
                expected,
                actual,
            }) => {
                debug!(%job_id, expected, actual, "stale job write, retrying");
                conflict = StoreError::Conflict {
                    job_id,
                    expected,
                    actual,
                };
            }
            Err(other) => return Err(other.into()),
        }
    }

    Err(MutateError::Store(conflict))
}
