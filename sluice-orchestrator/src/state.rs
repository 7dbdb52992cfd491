//! Shared handler state

use sluice_jobs::Registry;
use sluice_jobs::engine::Dispatcher;
use sluice_jobs::registry::GitSynchronizer;
use sqlx::PgPool;
use std::sync::Arc;

use crate::config::Config;
use crate::repository::backend::{PgLocks, PgResultStore, PgTaskQueue};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<Config>,
    pub git: Arc<dyn GitSynchronizer>,
}

impl AppState {
    /// Wire the dispatcher to the Postgres backends
    pub fn new(
        pool: PgPool,
        registry: Arc<Registry>,
        config: Config,
        git: Arc<dyn GitSynchronizer>,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            registry,
            Arc::new(PgResultStore::new(pool.clone())),
            Arc::new(PgLocks::new(pool.clone())),
            Arc::new(PgTaskQueue::new(pool.clone())),
        );
        Self {
            pool,
            dispatcher: Arc::new(dispatcher),
            config: Arc::new(config),
            git,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.dispatcher.registry()
    }
}
