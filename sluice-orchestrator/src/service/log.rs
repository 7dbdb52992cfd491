//! Log Service
//!
//! Business logic for job log management.

use sluice_core::domain::log::LogEntry;
use sluice_core::dto::log::LogBatch;
use sqlx::PgPool;
use uuid::Uuid;

use super::job::JobError;
use crate::repository::{log_repository, result_repository};

/// Append a batch of log entries to a result
pub async fn add_logs(pool: &PgPool, id: Uuid, batch: LogBatch) -> Result<usize, JobError> {
    if batch.job_result_id != id {
        return Err(JobError::BadRequest(format!(
            "Batch for {} sent to {}",
            batch.job_result_id, id
        )));
    }
    ensure_result_exists(pool, id).await?;

    if batch.entries.is_empty() {
        return Ok(0);
    }

    log_repository::add_entries(pool, id, &batch.entries).await?;
    tracing::debug!("Added {} log entries to {}", batch.entries.len(), id);
    Ok(batch.entries.len())
}

/// All entries of a result in emission order
pub async fn get_logs(pool: &PgPool, id: Uuid) -> Result<Vec<LogEntry>, JobError> {
    ensure_result_exists(pool, id).await?;
    Ok(log_repository::find_by_result(pool, id).await?)
}

async fn ensure_result_exists(pool: &PgPool, id: Uuid) -> Result<(), JobError> {
    result_repository::find_by_id(pool, id)
        .await?
        .map(|_| ())
        .ok_or_else(|| JobError::NotFound(format!("Job result {} not found", id)))
}
