//! Job poller
//!
//! Polls the orchestrator for pending results on this worker's queues,
//! claims as many as there are free execution slots and runs each one on the
//! engine in its own task.

use anyhow::{Context, Result};
use sluice_client::OrchestratorClient;
use sluice_core::dto::job::ClaimedJob;
use sluice_jobs::{Engine, ExecutionRequest};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};

use crate::config::Config;

/// Job poller that continuously polls for and executes jobs
pub struct JobPoller {
    config: Config,
    client: Arc<OrchestratorClient>,
    engine: Arc<Engine>,
    semaphore: Arc<Semaphore>,
}

impl JobPoller {
    pub fn new(config: Config, client: Arc<OrchestratorClient>, engine: Arc<Engine>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_jobs));
        Self {
            config,
            client,
            engine,
            semaphore,
        }
    }

    /// Starts the polling loop
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting job poller (interval: {:?}, queues: {})",
            self.config.poll_interval,
            self.config.task_queues.join(",")
        );

        let _heartbeat_handle = self.start_heartbeat_loop();

        let mut interval = time::interval(self.config.poll_interval);

        loop {
            interval.tick().await;

            debug!("Polling for pending job results");

            match self.poll_and_execute_once().await {
                Ok(started) => {
                    if started > 0 {
                        info!("Started {} job(s) this cycle", started);
                    }
                }
                Err(e) => {
                    error!("Error during poll cycle: {:#}", e);
                }
            }
        }
    }

    /// Performs a single poll cycle
    async fn poll_and_execute_once(&self) -> Result<usize> {
        let pending = self
            .client
            .pending_results(&self.config.task_queues)
            .await
            .context("Failed to fetch pending job results")?;

        if pending.is_empty() {
            debug!("No jobs available");
            return Ok(0);
        }

        let mut started = 0;

        for result in pending {
            // Only claim what can start right away
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                debug!("Max parallel jobs reached, leaving the rest for later");
                break;
            };

            let claimed = match self
                .client
                .claim_result(result.id, &self.config.worker_id)
                .await
            {
                Ok(claimed) => claimed,
                Err(e) if e.is_conflict() => {
                    debug!("Job result {} was claimed elsewhere", result.id);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to claim job result {}: {}", result.id, e);
                    continue;
                }
            };

            self.spawn_execution(claimed, permit);
            started += 1;
        }

        Ok(started)
    }

    /// Spawns a task to execute a single claimed result
    fn spawn_execution(
        &self,
        claimed: ClaimedJob,
        permit: OwnedSemaphorePermit,
    ) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(&self.engine);

        tokio::spawn(async move {
            let _permit = permit;
            let id = claimed.job_result.id;
            info!(
                "Executing {} ({})",
                claimed.job_result.class_path, id
            );

            let request = ExecutionRequest {
                job_result_id: id,
                data: claimed.data,
                user: claimed.user,
            };
            match engine.execute(request).await {
                Ok(result) => info!("Job result {} finished as {}", id, result.status),
                Err(e) => error!("Failed to execute job result {}: {}", id, e),
            }
        })
    }

    /// Starts a background task to send heartbeats
    fn start_heartbeat_loop(&self) -> tokio::task::JoinHandle<()> {
        let client = Arc::clone(&self.client);
        let worker_id = self.config.worker_id.clone();
        let heartbeat_interval: Duration = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval(heartbeat_interval);

            loop {
                ticker.tick().await;

                debug!("Sending heartbeat");

                if let Err(e) = client.heartbeat(&worker_id).await {
                    warn!("Failed to send heartbeat: {:#}", e);
                }
            }
        })
    }
}
