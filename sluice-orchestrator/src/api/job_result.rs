//! Job Result API Handlers
//!
//! Result lifecycle: worker claims and saves, logs, approval.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use sluice_core::domain::job_result::JobResult;
use sluice_core::domain::log::LogEntry;
use sluice_core::dto::job::{ApproveJob, ClaimJob, ClaimedJob, PendingQuery};
use sluice_core::dto::log::LogBatch;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::{log_service, result_service};
use crate::state::AppState;

// =============================================================================
// Result Lifecycle Endpoints
// =============================================================================

/// GET /api/job-results
pub async fn list_results(State(state): State<AppState>) -> ApiResult<Json<Vec<JobResult>>> {
    let results = result_service::list_results(&state.pool).await?;
    Ok(Json(results))
}

/// GET /api/job-results/{id}
pub async fn get_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobResult>> {
    tracing::debug!("Getting job result: {}", id);

    let result = result_service::get_result(&state.pool, id).await?;
    Ok(Json(result))
}

/// GET /api/job-results/pending?queues=a,b
/// Claimable results for a worker's queues
pub async fn pending_results(
    State(state): State<AppState>,
    Query(query): Query<PendingQuery>,
) -> ApiResult<Json<Vec<JobResult>>> {
    let results = result_service::pending_results(&state.pool, &query.queue_list()).await?;
    Ok(Json(results))
}

/// POST /api/job-results/{id}/claim
/// Hand the execution request to exactly one worker
pub async fn claim_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ClaimJob>,
) -> ApiResult<Json<ClaimedJob>> {
    tracing::info!("Worker {} claiming job result {}", req.worker_id, id);

    let claimed = result_service::claim_result(&state.pool, id, &req.worker_id).await?;
    Ok(Json(claimed))
}

/// PUT /api/job-results/{id}
pub async fn save_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(result): Json<JobResult>,
) -> ApiResult<StatusCode> {
    tracing::debug!("Saving job result {} ({})", id, result.status);

    result_service::save_result(&state.pool, id, result).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/job-results/{id}/approve
pub async fn approve_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ApproveJob>,
) -> ApiResult<Json<JobResult>> {
    tracing::info!("{} approving job result {}", req.approver, id);

    let result = result_service::approve_result(&state, id, &req.approver).await?;
    Ok(Json(result))
}

// =============================================================================
// Log Endpoints
// =============================================================================

/// GET /api/job-results/{id}/logs
pub async fn get_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<LogEntry>>> {
    let logs = log_service::get_logs(&state.pool, id).await?;
    Ok(Json(logs))
}

/// POST /api/job-results/{id}/logs
pub async fn add_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(batch): Json<LogBatch>,
) -> ApiResult<StatusCode> {
    let count = log_service::add_logs(&state.pool, id, batch).await?;
    tracing::debug!("Stored {} log entries for job result {}", count, id);

    Ok(StatusCode::NO_CONTENT)
}
