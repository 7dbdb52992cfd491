//! Worker API Handlers

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use sluice_core::domain::worker::Worker;
use sluice_core::dto::worker::{RegisterWorker, WorkerSummary};

use crate::api::error::ApiResult;
use crate::service::worker_service;
use crate::state::AppState;

/// POST /api/workers/register
pub async fn register_worker(
    State(state): State<AppState>,
    Json(req): Json<RegisterWorker>,
) -> ApiResult<Json<Worker>> {
    let worker = worker_service::register_worker(&state.pool, req).await?;
    Ok(Json(worker))
}

/// POST /api/workers/{id}/heartbeat
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
) -> ApiResult<StatusCode> {
    worker_service::heartbeat(&state.pool, &worker_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/workers
pub async fn list_workers(State(state): State<AppState>) -> ApiResult<Json<Vec<WorkerSummary>>> {
    let workers = worker_service::list_workers(&state.pool).await?;
    Ok(Json(workers))
}
