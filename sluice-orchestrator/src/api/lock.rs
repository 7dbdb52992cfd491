//! Singleton Lock API Handlers

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use sluice_core::dto::lock::{AcquireLock, LockStatus, ReleaseLock};

use crate::api::error::ApiResult;
use crate::service::lock_service;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LockQuery {
    pub key: String,
}

/// POST /api/locks/acquire
pub async fn acquire_lock(
    State(state): State<AppState>,
    Json(req): Json<AcquireLock>,
) -> ApiResult<Json<LockStatus>> {
    let status = lock_service::acquire(&state.pool, req).await?;
    Ok(Json(status))
}

/// POST /api/locks/release
pub async fn release_lock(
    State(state): State<AppState>,
    Json(req): Json<ReleaseLock>,
) -> ApiResult<StatusCode> {
    lock_service::release(&state.pool, req).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/locks?key=...
pub async fn lock_status(
    State(state): State<AppState>,
    Query(query): Query<LockQuery>,
) -> ApiResult<Json<LockStatus>> {
    let status = lock_service::status(&state.pool, &query.key).await?;
    Ok(Json(status))
}
