//! Singleton lock DTOs

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireLock {
    pub key: String,
    /// Job result id holding the lock
    pub owner: String,
    /// Lock expires if not released within this many seconds
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseLock {
    pub key: String,
    pub owner: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LockStatus {
    pub acquired: bool,
}
