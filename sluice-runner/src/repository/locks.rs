//! Singleton locks over the orchestrator API

use async_trait::async_trait;
use sluice_client::OrchestratorClient;
use sluice_jobs::engine::{LockError, SingletonLocks};
use std::sync::Arc;
use std::time::Duration;

/// Locks shared by every worker through the orchestrator's lock table
pub struct HttpLocks {
    client: Arc<OrchestratorClient>,
}

impl HttpLocks {
    pub fn new(client: Arc<OrchestratorClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SingletonLocks for HttpLocks {
    async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, LockError> {
        self.client
            .acquire_lock(key, owner, ttl)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))
    }

    async fn release(&self, key: &str, owner: &str) -> Result<(), LockError> {
        self.client
            .release_lock(key, owner)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))
    }

    async fn is_locked(&self, key: &str) -> Result<bool, LockError> {
        self.client
            .is_locked(key)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))
    }
}
