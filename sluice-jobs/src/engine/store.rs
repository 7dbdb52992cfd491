//! Persistence of job results and their log entries
//!
//! The engine and dispatcher only see the `ResultStore` trait. The runner
//! backs it with the orchestrator API; tests and in-process setups use
//! `MemoryResultStore`.

use async_trait::async_trait;
use sluice_core::domain::job_result::{JobResult, TransitionError};
use sluice_core::domain::log::LogEntry;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job result {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("result {0} is owned by another worker")]
    NotOwner(Uuid),

    #[error("no data transaction is open")]
    NoTransaction,

    #[error("store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn create(&self, result: &JobResult) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<JobResult, StoreError>;

    /// Persist a new state; status changes must follow the allowed transitions
    async fn save(&self, result: &JobResult) -> Result<(), StoreError>;

    async fn append_logs(&self, id: Uuid, entries: Vec<LogEntry>) -> Result<(), StoreError>;

    async fn logs(&self, id: Uuid) -> Result<Vec<LogEntry>, StoreError>;
}

/// Check a save against the stored row
pub fn check_save(stored: &JobResult, next: &JobResult) -> Result<(), StoreError> {
    if stored.status != next.status && !stored.status.can_transition_to(next.status) {
        return Err(TransitionError {
            from: stored.status,
            to: next.status,
        }
        .into());
    }
    if let (Some(owner), Some(worker)) = (&stored.worker_id, &next.worker_id) {
        if owner != worker {
            return Err(StoreError::NotOwner(stored.id));
        }
    }
    Ok(())
}

#[derive(Default)]
pub struct MemoryResultStore {
    results: Mutex<HashMap<Uuid, JobResult>>,
    logs: Mutex<HashMap<Uuid, Vec<LogEntry>>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<JobResult> {
        let mut results: Vec<JobResult> = self
            .results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        results.sort_by_key(|r| r.created_at);
        results
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn create(&self, result: &JobResult) -> Result<(), StoreError> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(result.id, result.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<JobResult, StoreError> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn save(&self, result: &JobResult) -> Result<(), StoreError> {
        let mut results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
        let stored = results.get(&result.id).ok_or(StoreError::NotFound(result.id))?;
        check_save(stored, result)?;
        results.insert(result.id, result.clone());
        Ok(())
    }

    async fn append_logs(&self, id: Uuid, entries: Vec<LogEntry>) -> Result<(), StoreError> {
        if !self
            .results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
        {
            return Err(StoreError::NotFound(id));
        }
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
            .extend(entries);
        Ok(())
    }

    async fn logs(&self, id: Uuid) -> Result<Vec<LogEntry>, StoreError> {
        let mut entries = self
            .logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .unwrap_or_default();
        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::domain::job::ClassPath;
    use sluice_core::domain::job_result::JobStatus;

    fn pending() -> JobResult {
        JobResult::new(ClassPath::local("m", "Job"), "Job")
    }

    #[tokio::test]
    async fn test_save_enforces_transitions() {
        let store = MemoryResultStore::new();
        let mut result = pending();
        store.create(&result).await.unwrap();

        result.transition(JobStatus::Running).unwrap();
        store.save(&result).await.unwrap();
        result.transition(JobStatus::Completed).unwrap();
        store.save(&result).await.unwrap();

        // A stale copy cannot move a terminal result back
        let mut stale = pending();
        stale.id = result.id;
        assert!(matches!(
            store.save(&stale).await,
            Err(StoreError::Transition(_))
        ));
        assert_eq!(store.get(result.id).await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_save_checks_owner() {
        let store = MemoryResultStore::new();
        let mut result = pending();
        result.worker_id = Some("worker-a".into());
        store.create(&result).await.unwrap();

        let mut other = result.clone();
        other.worker_id = Some("worker-b".into());
        assert!(matches!(store.save(&other).await, Err(StoreError::NotOwner(_))));
    }

    #[tokio::test]
    async fn test_unknown_result() {
        let store = MemoryResultStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(store.get(id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.append_logs(id, Vec::new()).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(store.logs(id).await.unwrap().is_empty());
    }
}
