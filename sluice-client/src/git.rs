//! Git source endpoints

use sluice_core::dto::git::GitSyncStatus;

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    /// Pull a configured repository and reload its jobs
    pub async fn sync_git_source(&self, slug: &str) -> Result<GitSyncStatus> {
        let response = self
            .client
            .post(self.url(&format!("/api/git/{}/sync", slug)))
            .send()
            .await?;

        self.handle_response(response).await
    }
}
