//! Job class endpoints

use sluice_core::domain::job::{ClassPath, JobDescriptor};
use sluice_core::domain::job_result::JobResult;
use sluice_core::dto::job::{EnqueueJob, JobSummary};

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    /// List registered job classes, hidden ones only when asked
    pub async fn list_jobs(&self, include_hidden: bool) -> Result<Vec<JobSummary>> {
        let response = self
            .client
            .get(self.url("/api/jobs"))
            .query(&[("include_hidden", include_hidden)])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Full descriptor of one job class: variables, meta and kind
    pub async fn get_job(&self, path: &ClassPath) -> Result<JobDescriptor> {
        let response = self
            .client
            .get(self.url(&format!("/api/jobs/{}", path)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Enqueue a run of a job class
    ///
    /// Returns the pending result. Invalid data fails with a 400 carrying
    /// per-field messages, a held singleton lock with a 409.
    ///
    /// # Example
    /// ```no_run
    /// # use sluice_client::OrchestratorClient;
    /// # use sluice_core::domain::job::ClassPath;
    /// # use sluice_core::dto::job::EnqueueJob;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// let path = ClassPath::parse("local/backup/Backup")?;
    /// let result = client.run_job(&path, EnqueueJob::default().with_dryrun(true)).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run_job(&self, path: &ClassPath, request: EnqueueJob) -> Result<JobResult> {
        let response = self
            .client
            .post(self.url(&format!("/api/jobs/{}/run", path)))
            .json(&request)
            .send()
            .await?;

        self.handle_response(response).await
    }
}
