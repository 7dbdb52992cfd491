//! Job result endpoints

use sluice_core::domain::job_result::JobResult;
use sluice_core::domain::log::LogEntry;
use sluice_core::dto::job::{ApproveJob, ClaimJob, ClaimedJob};
use sluice_core::dto::log::LogBatch;
use uuid::Uuid;

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    // =============================================================================
    // Queries
    // =============================================================================

    pub async fn list_results(&self) -> Result<Vec<JobResult>> {
        let response = self.client.get(self.url("/api/job-results")).send().await?;

        self.handle_response(response).await
    }

    pub async fn get_result(&self, id: Uuid) -> Result<JobResult> {
        let response = self
            .client
            .get(self.url(&format!("/api/job-results/{}", id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Claimable results on the given queues, oldest first
    pub async fn pending_results(&self, queues: &[String]) -> Result<Vec<JobResult>> {
        let response = self
            .client
            .get(self.url("/api/job-results/pending"))
            .query(&[("queues", queues.join(","))])
            .send()
            .await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Execution (worker side)
    // =============================================================================

    /// Take ownership of a pending result
    ///
    /// A 409 means another worker was faster.
    pub async fn claim_result(&self, id: Uuid, worker_id: &str) -> Result<ClaimedJob> {
        let response = self
            .client
            .post(self.url(&format!("/api/job-results/{}/claim", id)))
            .json(&ClaimJob {
                worker_id: worker_id.to_string(),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Persist a result; the orchestrator refuses backward transitions
    pub async fn save_result(&self, result: &JobResult) -> Result<()> {
        let response = self
            .client
            .put(self.url(&format!("/api/job-results/{}", result.id)))
            .json(result)
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    // =============================================================================
    // Logs
    // =============================================================================

    pub async fn get_logs(&self, id: Uuid) -> Result<Vec<LogEntry>> {
        let response = self
            .client
            .get(self.url(&format!("/api/job-results/{}/logs", id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Append log entries to a result; empty batches are not sent
    pub async fn send_logs(&self, id: Uuid, entries: Vec<LogEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(self.url(&format!("/api/job-results/{}/logs", id)))
            .json(&LogBatch {
                job_result_id: id,
                entries,
            })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    // =============================================================================
    // Approval
    // =============================================================================

    /// Approve a held result; the approver must not be the requester
    pub async fn approve_result(&self, id: Uuid, approver: &str) -> Result<JobResult> {
        let response = self
            .client
            .post(self.url(&format!("/api/job-results/{}/approve", id)))
            .json(&ApproveJob {
                approver: approver.to_string(),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }
}
