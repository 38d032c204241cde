//! Saga persistence port and the in-memory implementation used by the
//! local runtime and the test suites.

use crate::state::SagaState;
use aldatu_domain::CorrelationId;
use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

/// Errors from saga persistence
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SagaRepositoryError {
    #[error("Saga not found for correlation {0}")]
    NotFound(CorrelationId),

    #[error("Saga already exists for correlation {0}")]
    AlreadyExists(CorrelationId),

    #[error("Saga store failure: {0}")]
    Backend(String),
}

/// Store for saga records, keyed by correlation id. Records are
/// retained after reaching a terminal state so late duplicates can be
/// recognised and dropped.
#[async_trait]
pub trait SagaRepository: Send + Sync {
    async fn get(&self, correlation_id: CorrelationId)
        -> Result<Option<SagaState>, SagaRepositoryError>;

    /// Insert a new record; fails if the correlation id is taken.
    async fn insert(&self, state: SagaState) -> Result<(), SagaRepositoryError>;

    /// Replace an existing record.
    async fn update(&self, state: SagaState) -> Result<(), SagaRepositoryError>;

    async fn count(&self) -> Result<usize, SagaRepositoryError>;
}

/// DashMap-backed repository for in-process deployments and tests.
#[derive(Debug, Default)]
pub struct MemorySagaRepository {
    sagas: DashMap<CorrelationId, SagaState>,
}

impl MemorySagaRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SagaRepository for MemorySagaRepository {
    async fn get(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Option<SagaState>, SagaRepositoryError> {
        Ok(self.sagas.get(&correlation_id).map(|e| e.value().clone()))
    }

    async fn insert(&self, state: SagaState) -> Result<(), SagaRepositoryError> {
        match self.sagas.entry(state.correlation_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(SagaRepositoryError::AlreadyExists(state.correlation_id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(state);
                Ok(())
            }
        }
    }

    async fn update(&self, state: SagaState) -> Result<(), SagaRepositoryError> {
        if !self.sagas.contains_key(&state.correlation_id) {
            return Err(SagaRepositoryError::NotFound(state.correlation_id));
        }
        self.sagas.insert(state.correlation_id, state);
        Ok(())
    }

    async fn count(&self) -> Result<usize, SagaRepositoryError> {
        Ok(self.sagas.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aldatu_domain::JobId;

    fn state() -> SagaState {
        let (state, _) = SagaState::start(
            CorrelationId::new(),
            JobId::new(),
            vec!["ExportVmdk".to_string()],
        );
        state
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let repo = MemorySagaRepository::new();
        let saga = state();
        let id = saga.correlation_id;

        repo.insert(saga.clone()).await.unwrap();
        let loaded = repo.get(id).await.unwrap().unwrap();
        assert_eq!(loaded, saga);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn double_insert_is_rejected() {
        let repo = MemorySagaRepository::new();
        let saga = state();
        repo.insert(saga.clone()).await.unwrap();

        let err = repo.insert(saga.clone()).await.unwrap_err();
        assert_eq!(err, SagaRepositoryError::AlreadyExists(saga.correlation_id));
    }

    #[tokio::test]
    async fn update_requires_existing_record() {
        let repo = MemorySagaRepository::new();
        let saga = state();
        let err = repo.update(saga.clone()).await.unwrap_err();
        assert_eq!(err, SagaRepositoryError::NotFound(saga.correlation_id));
    }

    #[tokio::test]
    async fn missing_saga_is_none() {
        let repo = MemorySagaRepository::new();
        assert!(repo.get(CorrelationId::new()).await.unwrap().is_none());
    }
}
