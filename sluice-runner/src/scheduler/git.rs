//! Periodic Git refresh
//!
//! Pulls every configured repository; a checkout that moved is announced on
//! the refresh notifier and the registry reloads that source.

use sluice_jobs::registry::{GitRepository, GitSynchronizer, RefreshNotifier, sync_repository};
use std::sync::Arc;
use tokio::time::{self, Duration};
use tracing::{debug, warn};

pub struct GitRefresher {
    synchronizer: Arc<dyn GitSynchronizer>,
    repositories: Vec<GitRepository>,
    notifier: Arc<RefreshNotifier>,
    interval: Duration,
}

impl GitRefresher {
    pub fn new(
        synchronizer: Arc<dyn GitSynchronizer>,
        repositories: Vec<GitRepository>,
        notifier: Arc<RefreshNotifier>,
        interval: Duration,
    ) -> Self {
        Self {
            synchronizer,
            repositories,
            notifier,
            interval,
        }
    }

    /// Sync every repository once; returns how many changed
    ///
    /// A repository that fails to sync is logged and skipped.
    pub async fn sync_all(&self) -> usize {
        let mut changed = 0;
        for repository in &self.repositories {
            match sync_repository(
                self.synchronizer.as_ref(),
                repository,
                None,
                &self.notifier,
            )
            .await
            {
                Ok(true) => changed += 1,
                Ok(false) => debug!("Repository {} is up to date", repository.slug),
                Err(e) => warn!("{:#}", e),
            }
        }
        changed
    }

    /// Keep syncing on the configured interval
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if self.repositories.is_empty() {
                return;
            }

            let mut ticker = time::interval(self.interval);
            // The first tick fires immediately; startup already synced
            ticker.tick().await;

            loop {
                ticker.tick().await;
                self.sync_all().await;
            }
        })
    }
}
