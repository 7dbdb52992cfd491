//! Job API Handlers
//!
//! Introspection of registered job classes and enqueueing runs.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use sluice_core::domain::job::{ClassPath, JobDescriptor};
use sluice_core::domain::job_result::JobResult;
use sluice_core::dto::job::{EnqueueJob, JobSummary, ListJobsQuery};

use crate::api::error::{ApiError, ApiResult};
use crate::service::job_service;
use crate::state::AppState;

/// Rebuild a class path from its three URL segments
pub(crate) fn class_path(
    (grouping, module, class_name): (String, String, String),
) -> ApiResult<ClassPath> {
    ClassPath::parse(&format!("{}/{}/{}", grouping, module, class_name))
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// GET /api/jobs
/// List registered job classes
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<Vec<JobSummary>>> {
    tracing::debug!("Listing job classes (hidden: {})", query.include_hidden);

    Ok(Json(job_service::list_jobs(
        state.registry(),
        query.include_hidden,
    )))
}

/// GET /api/jobs/{grouping}/{module}/{class}
pub async fn get_job(
    State(state): State<AppState>,
    Path(segments): Path<(String, String, String)>,
) -> ApiResult<Json<JobDescriptor>> {
    let path = class_path(segments)?;
    tracing::debug!("Getting job class: {}", path);

    let descriptor = job_service::get_job(state.registry(), &path)?;
    Ok(Json(descriptor))
}

/// POST /api/jobs/{grouping}/{module}/{class}/run
/// Validate input and enqueue a run
pub async fn run_job(
    State(state): State<AppState>,
    Path(segments): Path<(String, String, String)>,
    Json(req): Json<EnqueueJob>,
) -> ApiResult<(StatusCode, Json<JobResult>)> {
    let path = class_path(segments)?;
    tracing::info!("Enqueueing run of {}", path);

    let result = job_service::run_job(&state, &path, req).await?;
    Ok((StatusCode::CREATED, Json(result)))
}
