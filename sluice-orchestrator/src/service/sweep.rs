//! Reconciliation sweep
//!
//! Results stay `running` forever when their worker dies. The sweep marks
//! them errored and frees the singleton locks they held. It also returns
//! unstarted claims of silent workers to the queue, drops expired singleton
//! locks and marks silent workers offline.

use chrono::Utc;
use sluice_core::domain::job_result::{JobError, JobResult, JobStatus};
use sluice_core::domain::log::{LogEntry, LogLevel};
use sluice_core::error::FailureCategory;
use sluice_jobs::engine::lock_owner;
use sqlx::PgPool;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::repository::{
    lock_repository, log_repository, payload_repository, result_repository, worker_repository,
};

/// Error type recorded on results whose worker disappeared
pub const WORKER_LOST: &str = "WorkerLost";

/// Log grouping of reconciliation entries
pub const RECONCILIATION_GROUPING: &str = "reconciliation";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub orphaned: usize,
    pub released_locks: u64,
    pub released_claims: u64,
    pub expired_locks: u64,
    pub offline_workers: u64,
}

/// What the sweep still has to write for an orphaned result
#[derive(Debug)]
struct Orphaned {
    entry: LogEntry,
    lock_owner: String,
}

/// Mark an orphaned result errored
fn mark_orphaned(result: &mut JobResult, last_seq: u64) -> Option<Orphaned> {
    let message = match &result.worker_id {
        Some(worker) => format!("Worker {} stopped responding while the job was running", worker),
        None => "The job was running on an unknown worker".to_string(),
    };
    let error = JobError::new(FailureCategory::RuntimeFailure, WORKER_LOST, message.clone());
    result.fail_with(JobStatus::Errored, error).ok()?;

    let entry = LogEntry {
        seq: last_seq + 1,
        timestamp: Utc::now(),
        level: LogLevel::Failure,
        grouping: RECONCILIATION_GROUPING.to_string(),
        object: None,
        message,
    };
    Some(Orphaned {
        entry,
        lock_owner: lock_owner(result.id),
    })
}

pub async fn sweep_once(pool: &PgPool, heartbeat_timeout: Duration) -> Result<SweepReport, sqlx::Error> {
    let timeout = chrono::Duration::from_std(heartbeat_timeout).unwrap_or(chrono::Duration::MAX);
    let cutoff = Utc::now()
        .checked_sub_signed(timeout)
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
    let mut report = SweepReport::default();

    for mut result in result_repository::find_orphaned(pool, cutoff).await? {
        let last_seq = log_repository::last_seq(pool, result.id).await?;
        let Some(orphaned) = mark_orphaned(&mut result, last_seq) else {
            continue;
        };
        result_repository::update(pool, &result).await?;
        log_repository::add_entries(pool, result.id, &[orphaned.entry]).await?;
        report.released_locks += lock_repository::release_owned(pool, &orphaned.lock_owner).await?;
        tracing::warn!("Job result {} orphaned, marked errored", result.id);
        report.orphaned += 1;
    }

    report.released_claims = payload_repository::release_stale_claims(pool, cutoff).await?;
    report.expired_locks = lock_repository::delete_expired(pool).await?;
    report.offline_workers = worker_repository::mark_stale_offline(pool, cutoff).await?;

    Ok(report)
}

/// Run the sweep on a fixed interval
pub fn spawn_sweeper(pool: PgPool, interval: Duration, heartbeat_timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;

            match sweep_once(&pool, heartbeat_timeout).await {
                Ok(report) if report != SweepReport::default() => {
                    tracing::info!("Sweep: {:?}", report)
                }
                Ok(_) => tracing::debug!("Sweep found nothing to reconcile"),
                Err(e) => tracing::error!("Sweep failed: {}", e),
            }
        }
    })
}
