//! Sluice Worker
//!
//! A worker process that executes job results queued by the orchestrator.
//!
//! Architecture:
//! - Configuration: settings from the environment
//! - Registry: local Lua jobs, Git repositories and the built-in app
//! - Repositories: results, logs and locks over HTTP, job data in Postgres
//! - Scheduler: polling, heartbeats and Git refreshes
//!
//! The worker polls the orchestrator for pending results on its queues,
//! claims them and runs each through the engine, streaming logs back while
//! the job runs.

mod config;
mod repository;
mod scheduler;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::repository::{HttpLocks, HttpResultStore, PgDataStore};
use crate::scheduler::{GitRefresher, JobPoller};
use sluice_client::OrchestratorClient;
use sluice_jobs::builtin::builtin_app;
use sluice_jobs::engine::{DataStore, MemoryDataStore};
use sluice_jobs::logging::Redactor;
use sluice_jobs::registry::{GitCli, GitSource, LocalSource, PluginSource, RefreshNotifier};
use sluice_jobs::{Engine, EngineConfig, Registry};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sluice_runner=info,sluice_jobs=info,sluice::job=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Sluice Worker");

    // Load configuration
    let config = load_config()?;
    info!(
        "Loaded configuration: worker_id={}, orchestrator_url={}",
        config.worker_id, config.orchestrator_url
    );

    if let Some(path) = &config.lua_stubs_path {
        std::fs::write(path, sluice_lua::job_module_stubs())
            .with_context(|| format!("Failed to write Lua stubs to {}", path.display()))?;
        info!("Wrote Lua stubs to {}", path.display());
    }

    let client = Arc::new(OrchestratorClient::new(config.orchestrator_url.clone()));

    // Job sources
    let registry = Arc::new(Registry::default());
    registry.add_source(Arc::new(LocalSource::new(config.jobs_root.clone())));
    for repository in config.git_repositories.iter().filter(|r| r.provides_jobs) {
        registry.add_source(Arc::new(GitSource::new(&config.git_root, repository.clone())));
    }
    registry.add_source(Arc::new(PluginSource::new(vec![builtin_app()])));

    let notifier = Arc::new(RefreshNotifier::new());
    let refresher = GitRefresher::new(
        Arc::new(GitCli::new(config.git_root.clone())),
        config.git_repositories.clone(),
        Arc::clone(&notifier),
        config.git_refresh_interval,
    );
    refresher.sync_all().await;

    let discovered = {
        let registry = Arc::clone(&registry);
        tokio::task::spawn_blocking(move || registry.discover_all())
            .await
            .context("Job discovery panicked")?
    };
    for (grouping, modules) in &discovered {
        let classes: usize = modules.values().map(|m| m.len()).sum();
        info!("  - {}: {} module(s), {} job class(es)", grouping, modules.len(), classes);
    }
    let _refresh_listener = registry.spawn_refresh_listener(&notifier);

    // Register with orchestrator (with retry logic)
    info!("Registering with orchestrator");
    register_with_retry(&client, &config.worker_id, config.task_queues.clone()).await?;
    info!("Registered successfully");

    let data: Arc<dyn DataStore> = match &config.data_database_url {
        Some(url) => Arc::new(
            PgDataStore::connect(url)
                .await
                .context("Failed to connect to the job data database")?,
        ),
        None => {
            warn!("DATA_DATABASE_URL not set, job data is kept in memory");
            Arc::new(MemoryDataStore::new())
        }
    };

    let engine = Arc::new(Engine::new(
        registry,
        Arc::new(HttpResultStore::new(Arc::clone(&client))),
        data,
        Arc::new(HttpLocks::new(Arc::clone(&client))),
        Arc::new(build_redactor(&config)?),
        EngineConfig {
            worker_id: config.worker_id.clone(),
            flush_interval: config.log_send_interval,
        },
    ));

    let _git_refresh = refresher.spawn();

    let poller = JobPoller::new(config.clone(), client, engine);

    info!(
        "Poll interval: {:?}, Log send interval: {:?}, Max parallel jobs: {}",
        config.poll_interval, config.log_send_interval, config.max_parallel_jobs
    );

    if let Err(e) = poller.run().await {
        error!("Poller error: {}", e);
        return Err(e);
    }

    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            info!("Failed to load config from environment ({}), using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn build_redactor(config: &Config) -> Result<Redactor> {
    let mut redactor = Redactor::with_defaults();
    for pattern in &config.log_redaction_patterns {
        redactor
            .add_pattern(pattern)
            .with_context(|| format!("Invalid redaction pattern '{}'", pattern))?;
    }
    Ok(redactor)
}

/// Register with orchestrator with retry logic and exponential backoff
///
/// The orchestrator may not be ready yet when the worker starts (common in
/// container environments).
async fn register_with_retry(
    client: &Arc<OrchestratorClient>,
    worker_id: &str,
    queues: Vec<String>,
) -> Result<()> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match client.register_worker(worker_id, queues.clone()).await {
            Ok(_) => {
                if attempt > 1 {
                    info!(
                        "Successfully registered with orchestrator after {} attempt(s)",
                        attempt
                    );
                }
                return Ok(());
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    error!(
                        "Failed to register with orchestrator after {} attempts",
                        MAX_RETRIES
                    );
                    return Err(anyhow::anyhow!(
                        "Failed to register worker with orchestrator: {}",
                        e
                    ));
                }

                warn!(
                    "Failed to register with orchestrator (attempt {}/{}): {}",
                    attempt, MAX_RETRIES, e
                );
                warn!("Retrying in {} ms...", delay_ms);

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                // Exponential backoff with cap
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}
