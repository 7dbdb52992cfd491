//! Worker Service
//!
//! Business logic for worker registration and heartbeats.

use sluice_core::domain::worker::Worker;
use sluice_core::dto::worker::{RegisterWorker, WorkerSummary};
use sqlx::PgPool;

use crate::repository::worker_repository;

/// Service error type
#[derive(Debug)]
pub enum WorkerError {
    NotFound(String),
    ValidationError(String),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for WorkerError {
    fn from(err: sqlx::Error) -> Self {
        WorkerError::DatabaseError(err)
    }
}

/// Register a worker, or refresh the queues of a known one
pub async fn register_worker(pool: &PgPool, req: RegisterWorker) -> Result<Worker, WorkerError> {
    validate_registration(&req)?;

    let worker = worker_repository::register(pool, req).await?;

    tracing::info!(
        "Worker registered: {} (queues: {})",
        worker.id,
        worker.queues.join(",")
    );

    Ok(worker)
}

pub async fn heartbeat(pool: &PgPool, worker_id: &str) -> Result<(), WorkerError> {
    if !worker_repository::update_heartbeat(pool, worker_id).await? {
        return Err(WorkerError::NotFound(format!(
            "Worker {} is not registered",
            worker_id
        )));
    }

    tracing::debug!("Heartbeat from {}", worker_id);
    Ok(())
}

pub async fn list_workers(pool: &PgPool) -> Result<Vec<WorkerSummary>, WorkerError> {
    let workers = worker_repository::list_all(pool).await?;
    Ok(workers.into_iter().map(WorkerSummary::from).collect())
}

// =============================================================================
// Validation
// =============================================================================

fn validate_registration(req: &RegisterWorker) -> Result<(), WorkerError> {
    if req.worker_id.trim().is_empty() {
        return Err(WorkerError::ValidationError(
            "worker_id cannot be empty".to_string(),
        ));
    }
    if req.queues.iter().all(|q| q.trim().is_empty()) {
        return Err(WorkerError::ValidationError(
            "a worker must consume at least one queue".to_string(),
        ));
    }
    Ok(())
}
