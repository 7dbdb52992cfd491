//! Postgres backends for the dispatcher
//!
//! The orchestrator enqueues through the same `Dispatcher` a worker uses
//! in-process. Results and locks live in their tables; the task queue is the
//! `job_payloads` table that workers claim from.

use async_trait::async_trait;
use sluice_core::domain::job_result::JobResult;
use sluice_core::domain::log::LogEntry;
use sluice_jobs::engine::{
    LockError, QueueError, ResultStore, SingletonLocks, StoreError, TaskHandle, TaskMessage,
    TaskQueue,
};
use sluice_jobs::engine::store::check_save;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use super::{lock_repository, log_repository, payload_repository, result_repository};

fn store_backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

pub struct PgResultStore {
    pool: PgPool,
}

impl PgResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn create(&self, result: &JobResult) -> Result<(), StoreError> {
        result_repository::create(&self.pool, result)
            .await
            .map_err(store_backend)
    }

    async fn get(&self, id: Uuid) -> Result<JobResult, StoreError> {
        result_repository::find_by_id(&self.pool, id)
            .await
            .map_err(store_backend)?
            .ok_or(StoreError::NotFound(id))
    }

    async fn save(&self, result: &JobResult) -> Result<(), StoreError> {
        let stored = self.get(result.id).await?;
        check_save(&stored, result)?;
        result_repository::update(&self.pool, result)
            .await
            .map_err(store_backend)?;
        Ok(())
    }

    async fn append_logs(&self, id: Uuid, entries: Vec<LogEntry>) -> Result<(), StoreError> {
        log_repository::add_entries(&self.pool, id, &entries)
            .await
            .map_err(store_backend)
    }

    async fn logs(&self, id: Uuid) -> Result<Vec<LogEntry>, StoreError> {
        log_repository::find_by_result(&self.pool, id)
            .await
            .map_err(store_backend)
    }
}

pub struct PgLocks {
    pool: PgPool,
}

impl PgLocks {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SingletonLocks for PgLocks {
    async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, LockError> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| LockError::Backend(e.to_string()))?;
        lock_repository::acquire(&self.pool, key, owner, chrono::Utc::now() + ttl)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))
    }

    async fn release(&self, key: &str, owner: &str) -> Result<(), LockError> {
        lock_repository::release(&self.pool, key, owner)
            .await
            .map(|_| ())
            .map_err(|e| LockError::Backend(e.to_string()))
    }

    async fn is_locked(&self, key: &str) -> Result<bool, LockError> {
        lock_repository::is_locked(&self.pool, key)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))
    }
}

/// Queue whose messages wait in `job_payloads` until a worker claims them
pub struct PgTaskQueue {
    pool: PgPool,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    async fn enqueue(&self, message: TaskMessage) -> Result<TaskHandle, QueueError> {
        payload_repository::upsert(&self.pool, &message, false)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(TaskHandle::detached(message.job_result_id))
    }
}
