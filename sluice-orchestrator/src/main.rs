//! Sluice Orchestrator
//!
//! HTTP service that owns job results, logs, locks, hooks and buttons.
//! Workers register here, claim pending results and stream logs back; a
//! background sweep reconciles results whose worker went away.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sluice_jobs::Registry;
use sluice_jobs::builtin::builtin_app;
use sluice_jobs::registry::{GitCli, GitSource, GitSynchronizer, LocalSource, PluginSource};

pub mod api;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;
pub mod state;

use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sluice_orchestrator=debug,sluice_jobs=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Sluice Orchestrator...");

    let config = Config::from_env()?;

    tracing::info!("Connecting to database...");

    // Create database connection pool
    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    tracing::info!("Database connection pool created");

    // Run migrations
    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    // Git checkouts must exist before their jobs can be discovered
    let git: Arc<dyn GitSynchronizer> = Arc::new(GitCli::new(config.git_root.clone()));
    for repository in &config.git_repositories {
        if let Err(e) = git.ensure_local_clone(repository, None).await {
            tracing::warn!("Could not sync git repository {}: {:#}", repository.slug, e);
        }
    }

    let registry = Arc::new(Registry::default());
    registry.add_source(Arc::new(LocalSource::new(config.jobs_root.clone())));
    for repository in config.git_repositories.iter().filter(|r| r.provides_jobs) {
        registry.add_source(Arc::new(GitSource::new(&config.git_root, repository.clone())));
    }
    registry.add_source(Arc::new(PluginSource::new(vec![builtin_app()])));

    let discovered = {
        let registry = Arc::clone(&registry);
        tokio::task::spawn_blocking(move || registry.discover_all())
            .await
            .context("Job discovery panicked")?
    };
    tracing::info!("Discovered job classes from {} source(s)", discovered.len());

    let _sweeper = service::sweep::spawn_sweeper(
        pool.clone(),
        config.sweep_interval,
        config.worker_heartbeat_timeout,
    );

    let addr = config.bind_addr.clone();
    let app = api::create_router(AppState::new(pool, registry, config, git));

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
