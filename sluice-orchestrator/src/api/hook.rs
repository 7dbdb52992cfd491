//! Job Hook and Job Button API Handlers

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use sluice_core::domain::change::ObjectChange;
use sluice_core::domain::hook::{JobButton, JobHook};
use sluice_core::domain::job_result::JobResult;
use sluice_core::dto::hook::{CreateJobButton, CreateJobHook, RunJobButton};
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::hook_service;
use crate::state::AppState;

// =============================================================================
// Job Hooks
// =============================================================================

/// GET /api/job-hooks
pub async fn list_hooks(State(state): State<AppState>) -> ApiResult<Json<Vec<JobHook>>> {
    let hooks = hook_service::list_hooks(&state.pool).await?;
    Ok(Json(hooks))
}

/// POST /api/job-hooks
pub async fn create_hook(
    State(state): State<AppState>,
    Json(req): Json<CreateJobHook>,
) -> ApiResult<(StatusCode, Json<JobHook>)> {
    tracing::info!("Creating job hook {} for {}", req.name, req.class_path);

    let hook = hook_service::create_hook(&state, req).await?;
    Ok((StatusCode::CREATED, Json(hook)))
}

/// POST /api/object-changes
/// Fan an object change out to every matching hook
pub async fn object_change(
    State(state): State<AppState>,
    Json(change): Json<ObjectChange>,
) -> ApiResult<Json<Vec<JobResult>>> {
    tracing::debug!(
        "Object change on {} {}",
        change.changed_object_type,
        change.changed_object_id
    );

    let results = hook_service::receive_object_change(&state, change).await?;
    Ok(Json(results))
}

// =============================================================================
// Job Buttons
// =============================================================================

/// GET /api/job-buttons
pub async fn list_buttons(State(state): State<AppState>) -> ApiResult<Json<Vec<JobButton>>> {
    let buttons = hook_service::list_buttons(&state.pool).await?;
    Ok(Json(buttons))
}

/// POST /api/job-buttons
pub async fn create_button(
    State(state): State<AppState>,
    Json(req): Json<CreateJobButton>,
) -> ApiResult<(StatusCode, Json<JobButton>)> {
    tracing::info!("Creating job button {} for {}", req.name, req.class_path);

    let button = hook_service::create_button(&state, req).await?;
    Ok((StatusCode::CREATED, Json(button)))
}

/// POST /api/job-buttons/{id}/run
pub async fn run_button(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RunJobButton>,
) -> ApiResult<(StatusCode, Json<JobResult>)> {
    let result = hook_service::press_button(&state, id, req).await?;
    Ok((StatusCode::CREATED, Json(result)))
}
