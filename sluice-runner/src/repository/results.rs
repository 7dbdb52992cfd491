//! Job results over the orchestrator API

use async_trait::async_trait;
use sluice_client::{ClientError, OrchestratorClient};
use sluice_core::domain::job_result::JobResult;
use sluice_core::domain::log::LogEntry;
use sluice_jobs::engine::{ResultStore, StoreError};
use std::sync::Arc;
use uuid::Uuid;

/// `ResultStore` whose rows live in the orchestrator
///
/// Results are created by the orchestrator when a job is enqueued, so
/// `create` is refused here.
pub struct HttpResultStore {
    client: Arc<OrchestratorClient>,
}

impl HttpResultStore {
    pub fn new(client: Arc<OrchestratorClient>) -> Self {
        Self { client }
    }
}

fn store_error(id: Uuid, err: ClientError) -> StoreError {
    if err.is_not_found() {
        StoreError::NotFound(id)
    } else {
        StoreError::Backend(err.to_string())
    }
}

#[async_trait]
impl ResultStore for HttpResultStore {
    async fn create(&self, result: &JobResult) -> Result<(), StoreError> {
        Err(StoreError::Backend(format!(
            "workers cannot create job results ({})",
            result.id
        )))
    }

    async fn get(&self, id: Uuid) -> Result<JobResult, StoreError> {
        self.client
            .get_result(id)
            .await
            .map_err(|e| store_error(id, e))
    }

    async fn save(&self, result: &JobResult) -> Result<(), StoreError> {
        self.client
            .save_result(result)
            .await
            .map_err(|e| store_error(result.id, e))
    }

    async fn append_logs(&self, id: Uuid, entries: Vec<LogEntry>) -> Result<(), StoreError> {
        self.client
            .send_logs(id, entries)
            .await
            .map_err(|e| store_error(id, e))
    }

    async fn logs(&self, id: Uuid) -> Result<Vec<LogEntry>, StoreError> {
        self.client.get_logs(id).await.map_err(|e| store_error(id, e))
    }
}
