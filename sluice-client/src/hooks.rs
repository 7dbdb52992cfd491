//! Job hook, object change and job button endpoints

use sluice_core::domain::change::ObjectChange;
use sluice_core::domain::hook::{JobButton, JobHook};
use sluice_core::domain::job_result::JobResult;
use sluice_core::domain::log::ObjectRef;
use sluice_core::domain::user::RequestUser;
use sluice_core::dto::hook::{CreateJobButton, CreateJobHook, RunJobButton};
use uuid::Uuid;

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    // =============================================================================
    // Job Hooks
    // =============================================================================

    pub async fn list_job_hooks(&self) -> Result<Vec<JobHook>> {
        let response = self.client.get(self.url("/api/job-hooks")).send().await?;

        self.handle_response(response).await
    }

    pub async fn create_job_hook(&self, hook: CreateJobHook) -> Result<JobHook> {
        let response = self
            .client
            .post(self.url("/api/job-hooks"))
            .json(&hook)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Report an object change; returns a result per matching hook
    pub async fn send_object_change(&self, change: &ObjectChange) -> Result<Vec<JobResult>> {
        let response = self
            .client
            .post(self.url("/api/object-changes"))
            .json(change)
            .send()
            .await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Job Buttons
    // =============================================================================

    pub async fn list_job_buttons(&self) -> Result<Vec<JobButton>> {
        let response = self.client.get(self.url("/api/job-buttons")).send().await?;

        self.handle_response(response).await
    }

    pub async fn create_job_button(&self, button: CreateJobButton) -> Result<JobButton> {
        let response = self
            .client
            .post(self.url("/api/job-buttons"))
            .json(&button)
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn run_job_button(
        &self,
        button_id: Uuid,
        object: ObjectRef,
        user: Option<RequestUser>,
    ) -> Result<JobResult> {
        let response = self
            .client
            .post(self.url(&format!("/api/job-buttons/{}/run", button_id)))
            .json(&RunJobButton { object, user })
            .send()
            .await?;

        self.handle_response(response).await
    }
}
