//! Git source DTOs

use serde::{Deserialize, Serialize};

/// Outcome of syncing one Git repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSyncStatus {
    pub slug: String,
    /// Whether the checkout moved to a new commit
    pub updated: bool,
    /// Job classes registered from the repository after the sync
    pub job_classes: usize,
}
