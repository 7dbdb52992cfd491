//! Git Source API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use sluice_core::dto::git::GitSyncStatus;

use crate::api::error::ApiResult;
use crate::service::git_service;
use crate::state::AppState;

/// POST /api/git/{slug}/sync
/// Pull a configured repository and reload the jobs it provides
pub async fn sync_repository(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<Json<GitSyncStatus>> {
    tracing::info!("Sync requested for git repository {}", slug);

    let status = git_service::sync_source(&state, &slug).await?;
    Ok(Json(status))
}
