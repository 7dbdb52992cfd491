//! Worker registration endpoints

use sluice_core::domain::worker::Worker;
use sluice_core::dto::worker::{RegisterWorker, WorkerSummary};

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    /// Register a worker and the task queues it consumes
    ///
    /// Registering an id again updates its queues and marks it online.
    pub async fn register_worker(&self, worker_id: &str, queues: Vec<String>) -> Result<Worker> {
        let response = self
            .client
            .post(self.url("/api/workers/register"))
            .json(&RegisterWorker {
                worker_id: worker_id.to_string(),
                queues,
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn heartbeat(&self, worker_id: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/api/workers/{}/heartbeat", worker_id)))
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    pub async fn list_workers(&self) -> Result<Vec<WorkerSummary>> {
        let response = self.client.get(self.url("/api/workers")).send().await?;

        self.handle_response(response).await
    }
}
