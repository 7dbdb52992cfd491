//! Singleton lock endpoints

use sluice_core::dto::lock::{AcquireLock, LockStatus, ReleaseLock};
use std::time::Duration;

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    /// Try to take a lock; `false` when someone else holds it
    pub async fn acquire_lock(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let response = self
            .client
            .post(self.url("/api/locks/acquire"))
            .json(&AcquireLock {
                key: key.to_string(),
                owner: owner.to_string(),
                ttl_seconds: ttl.as_secs().max(1),
            })
            .send()
            .await?;

        let status: LockStatus = self.handle_response(response).await?;
        Ok(status.acquired)
    }

    /// Release a lock held by `owner`; releasing a free lock is not an error
    pub async fn release_lock(&self, key: &str, owner: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("/api/locks/release"))
            .json(&ReleaseLock {
                key: key.to_string(),
                owner: owner.to_string(),
            })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    pub async fn is_locked(&self, key: &str) -> Result<bool> {
        let response = self
            .client
            .get(self.url("/api/locks"))
            .query(&[("key", key)])
            .send()
            .await?;

        let status: LockStatus = self.handle_response(response).await?;
        Ok(status.acquired)
    }
}
