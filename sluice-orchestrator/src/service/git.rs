//! Git Service
//!
//! On-demand sync of a configured repository and reload of its jobs.

use sluice_core::dto::git::GitSyncStatus;

use crate::state::AppState;

/// Service error type
#[derive(Debug)]
pub enum GitError {
    UnknownRepository(String),
    SyncFailed(String),
    ReloadFailed(String),
}

/// Make sure the repository is cloned and current, then reload its jobs
pub async fn sync_source(state: &AppState, slug: &str) -> Result<GitSyncStatus, GitError> {
    let repository = state
        .config
        .repository(slug)
        .cloned()
        .ok_or_else(|| GitError::UnknownRepository(slug.to_string()))?;

    let updated = state
        .git
        .ensure_local_clone(&repository, None)
        .await
        .map_err(|e| GitError::SyncFailed(format!("{:#}", e)))?;

    let job_classes = if repository.provides_jobs {
        let registry = state.registry().clone();
        let grouping = repository.grouping();
        tokio::task::spawn_blocking(move || registry.reload_source(&grouping))
            .await
            .map_err(|e| GitError::ReloadFailed(e.to_string()))?
            .map_err(|e| GitError::ReloadFailed(e.to_string()))?
    } else {
        0
    };

    tracing::info!(
        "Synced repository {} (changed: {}, job classes: {})",
        slug,
        updated,
        job_classes
    );

    Ok(GitSyncStatus {
        slug: repository.slug,
        updated,
        job_classes,
    })
}
