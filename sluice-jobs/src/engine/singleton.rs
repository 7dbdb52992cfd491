//! Singleton locks
//!
//! A singleton job holds its lock key from before it turns `Running` until it
//! reaches a terminal state. Locks carry a TTL so that a crashed worker does
//! not block the key forever; a live run keeps pushing the expiry forward
//! through a `LockKeeper`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lock TTL used when a job declares no hard time limit
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60 * 60);

/// Extra lifetime granted past the hard time limit
pub const LOCK_TTL_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait SingletonLocks: Send + Sync {
    /// Take `key` for `owner`; `false` when someone else holds it
    async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Release `key` if `owner` holds it
    async fn release(&self, key: &str, owner: &str) -> Result<(), LockError>;

    async fn is_locked(&self, key: &str) -> Result<bool, LockError>;

    /// Push the expiry of a lock `owner` holds; `false` when it is no longer theirs
    ///
    /// Taking a lock again as its current owner refreshes the expiry, which
    /// is what backends without a dedicated call rely on.
    async fn extend(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, LockError> {
        self.acquire(key, owner, ttl).await
    }
}

/// Owner recorded on the lock taken for a job result
pub fn lock_owner(job_result_id: Uuid) -> String {
    job_result_id.to_string()
}

/// TTL of the lock taken for a job with the given hard limit
pub fn lock_ttl(time_limit: Option<u64>) -> Duration {
    time_limit
        .map(|secs| Duration::from_secs(secs) + LOCK_TTL_GRACE)
        .unwrap_or(DEFAULT_LOCK_TTL)
}

struct Held {
    owner: String,
    expires_at: Instant,
}

/// Process local locks
#[derive(Default)]
pub struct MemoryLocks {
    held: Mutex<HashMap<String, Held>>,
}

impl MemoryLocks {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SingletonLocks for MemoryLocks {
    async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        let free = held
            .get(key)
            .map(|h| h.expires_at <= now || h.owner == owner)
            .unwrap_or(true);
        if free {
            held.insert(
                key.to_string(),
                Held {
                    owner: owner.to_string(),
                    expires_at: now + ttl,
                },
            );
        }
        Ok(free)
    }

    async fn release(&self, key: &str, owner: &str) -> Result<(), LockError> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if held.get(key).map(|h| h.owner == owner).unwrap_or(false) {
            held.remove(key);
        }
        Ok(())
    }

    async fn is_locked(&self, key: &str) -> Result<bool, LockError> {
        let now = Instant::now();
        Ok(self
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|h| h.expires_at > now)
            .unwrap_or(false))
    }

    async fn extend(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        match held.get_mut(key) {
            Some(h) if h.owner == owner && h.expires_at > now => {
                h.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// =============================================================================
// Renewal
// =============================================================================

/// Renews a held lock every third of its TTL until finished
pub struct LockKeeper {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl LockKeeper {
    pub fn spawn(locks: Arc<dyn SingletonLocks>, key: String, owner: String, ttl: Duration) -> Self {
        let (stop, mut stopped) = oneshot::channel();
        let period = (ttl / 3).max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => match locks.extend(&key, &owner, ttl).await {
                        Ok(true) => debug!("Renewed singleton lock {}", key),
                        Ok(false) => {
                            warn!("Singleton lock {} is no longer held by {}", key, owner);
                            break;
                        }
                        Err(e) => warn!("Failed to renew singleton lock {}: {}", key, e),
                    },
                }
            }
        });
        Self { stop, task }
    }

    /// Stop renewing; the lock itself is left for the caller to release
    pub async fn finish(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            warn!("Lock keeper stopped abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_owner_is_refused() {
        let locks = MemoryLocks::new();
        let ttl = Duration::from_secs(10);
        assert!(locks.acquire("k", "a", ttl).await.unwrap());
        assert!(!locks.acquire("k", "b", ttl).await.unwrap());
        assert!(locks.is_locked("k").await.unwrap());

        // Only the owner can release
        locks.release("k", "b").await.unwrap();
        assert!(locks.is_locked("k").await.unwrap());
        locks.release("k", "a").await.unwrap();
        assert!(!locks.is_locked("k").await.unwrap());
        assert!(locks.acquire("k", "b", ttl).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lock_is_free() {
        let locks = MemoryLocks::new();
        assert!(locks.acquire("k", "a", Duration::from_secs(5)).await.unwrap());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!locks.is_locked("k").await.unwrap());
        assert!(locks.acquire("k", "b", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_needs_a_live_lock() {
        let locks = MemoryLocks::new();
        let ttl = Duration::from_secs(5);
        assert!(!locks.extend("k", "a", ttl).await.unwrap());

        assert!(locks.acquire("k", "a", ttl).await.unwrap());
        assert!(!locks.extend("k", "b", ttl).await.unwrap());
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(locks.extend("k", "a", ttl).await.unwrap());
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(locks.is_locked("k").await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!locks.extend("k", "a", ttl).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeper_holds_lock_past_ttl() {
        let locks = Arc::new(MemoryLocks::new());
        let ttl = Duration::from_secs(30);
        assert!(locks.acquire("k", "a", ttl).await.unwrap());
        let keeper = LockKeeper::spawn(locks.clone(), "k".into(), "a".into(), ttl);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(!locks.acquire("k", "b", ttl).await.unwrap());

        keeper.finish().await;
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(locks.acquire("k", "b", ttl).await.unwrap());
    }

    #[test]
    fn test_lock_owner_is_result_id() {
        let id = Uuid::new_v4();
        assert_eq!(lock_owner(id), id.to_string());
    }

    #[test]
    fn test_ttl_follows_time_limit() {
        assert_eq!(lock_ttl(Some(30)), Duration::from_secs(90));
        assert_eq!(lock_ttl(None), DEFAULT_LOCK_TTL);
    }
}
