//! Transactional data scope around a job body
//!
//! `run` and the checks share one data transaction. The engine ends it with
//! `commit_unless(dryrun)`: a dry run, a raised failure or an explicit
//! `fail` roll it back. Dropping a transaction that was never committed also
//! rolls it back, which is what happens when the hard time limit drops the
//! job body.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::store::StoreError;

/// One open unit of work against the data layer
#[async_trait]
pub trait DataTransaction: Send {
    async fn get(&mut self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn put(&mut self, key: &str, value: Value) -> Result<(), StoreError>;

    /// `true` when the key existed
    async fn delete(&mut self, key: &str) -> Result<bool, StoreError>;

    /// Keys starting with `prefix`, sorted
    async fn keys(&mut self, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Source of data transactions
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn DataTransaction>, StoreError>;
}

// =============================================================================
// Handle and scope
// =============================================================================

/// Shared access to the transaction of the running job
///
/// Operations fail with `StoreError::NoTransaction` once the scope closed.
#[derive(Clone)]
pub struct DataHandle {
    tx: Arc<tokio::sync::Mutex<Option<Box<dyn DataTransaction>>>>,
}

impl DataHandle {
    fn new(tx: Box<dyn DataTransaction>) -> Self {
        Self {
            tx: Arc::new(tokio::sync::Mutex::new(Some(tx))),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut guard = self.tx.lock().await;
        guard.as_mut().ok_or(StoreError::NoTransaction)?.get(key).await
    }

    pub async fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut guard = self.tx.lock().await;
        guard
            .as_mut()
            .ok_or(StoreError::NoTransaction)?
            .put(key, value)
            .await
    }

    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut guard = self.tx.lock().await;
        guard.as_mut().ok_or(StoreError::NoTransaction)?.delete(key).await
    }

    pub async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut guard = self.tx.lock().await;
        guard.as_mut().ok_or(StoreError::NoTransaction)?.keys(prefix).await
    }

    async fn take(&self) -> Option<Box<dyn DataTransaction>> {
        self.tx.lock().await.take()
    }
}

/// How a scope ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeExit {
    Committed,
    RolledBack,
}

/// The transaction wrapped around `run` and the checks
pub struct TransactionScope {
    handle: DataHandle,
}

impl TransactionScope {
    pub async fn open(store: &dyn DataStore) -> Result<Self, StoreError> {
        let tx = store.begin().await?;
        Ok(Self {
            handle: DataHandle::new(tx),
        })
    }

    pub fn handle(&self) -> DataHandle {
        self.handle.clone()
    }

    /// Commit, or roll back when `dryrun` is set
    pub async fn commit_unless(self, dryrun: bool) -> Result<ScopeExit, StoreError> {
        if dryrun {
            return self.rollback().await;
        }
        match self.handle.take().await {
            Some(tx) => {
                tx.commit().await?;
                Ok(ScopeExit::Committed)
            }
            None => Err(StoreError::NoTransaction),
        }
    }

    pub async fn rollback(self) -> Result<ScopeExit, StoreError> {
        if let Some(tx) = self.handle.take().await {
            tx.rollback().await?;
        }
        Ok(ScopeExit::RolledBack)
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// Key/value data store kept in memory
///
/// Writes are staged per transaction and applied on commit.
#[derive(Clone, Default)]
pub struct MemoryDataStore {
    rows: Arc<Mutex<BTreeMap<String, Value>>>,
    fail_commits: Arc<AtomicBool>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed rows
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make every later commit fail
    pub fn fail_commits(&self) {
        self.fail_commits.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn begin(&self) -> Result<Box<dyn DataTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            staged: BTreeMap::new(),
        }))
    }
}

struct MemoryTransaction {
    store: MemoryDataStore,
    /// `None` marks a staged delete
    staged: BTreeMap<String, Option<Value>>,
}

impl MemoryTransaction {
    fn view(&self) -> BTreeMap<String, Value> {
        let mut rows = self.store.snapshot();
        for (key, value) in &self.staged {
            match value {
                Some(value) => {
                    rows.insert(key.clone(), value.clone());
                }
                None => {
                    rows.remove(key);
                }
            }
        }
        rows
    }
}

#[async_trait]
impl DataTransaction for MemoryTransaction {
    async fn get(&mut self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.view().remove(key))
    }

    async fn put(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        self.staged.insert(key.to_string(), Some(value));
        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<bool, StoreError> {
        let existed = self.view().contains_key(key);
        self.staged.insert(key.to_string(), None);
        Ok(existed)
    }

    async fn keys(&mut self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .view()
            .into_keys()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction { store, staged } = *self;
        if store.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("commit rejected".to_string()));
        }
        let mut rows = store.rows.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in staged {
            match value {
                Some(value) => {
                    rows.insert(key, value);
                }
                None => {
                    rows.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_commit_applies_staged_writes() {
        let store = MemoryDataStore::new();
        let scope = TransactionScope::open(&store).await.unwrap();
        let data = scope.handle();

        data.put("device/1", json!({"name": "edge-01"})).await.unwrap();
        data.put("device/2", json!({"name": "edge-02"})).await.unwrap();
        assert!(data.delete("device/2").await.unwrap());
        assert!(store.snapshot().is_empty());

        assert_eq!(scope.commit_unless(false).await.unwrap(), ScopeExit::Committed);
        assert_eq!(store.snapshot().len(), 1);
        assert_eq!(store.snapshot()["device/1"], json!({"name": "edge-01"}));

        // The handle is dead once the scope closed
        assert!(matches!(
            data.get("device/1").await,
            Err(StoreError::NoTransaction)
        ));
    }

    #[tokio::test]
    async fn test_dryrun_rolls_back() {
        let store = MemoryDataStore::new();
        let scope = TransactionScope::open(&store).await.unwrap();
        scope.handle().put("site/ams", json!(1)).await.unwrap();
        assert_eq!(
            scope.handle().get("site/ams").await.unwrap(),
            Some(json!(1))
        );

        assert_eq!(scope.commit_unless(true).await.unwrap(), ScopeExit::RolledBack);
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_scope_discards_writes() {
        let store = MemoryDataStore::new();
        {
            let scope = TransactionScope::open(&store).await.unwrap();
            scope.handle().put("k", json!("v")).await.unwrap();
        }
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_keys_by_prefix_see_staged_state() {
        let store = MemoryDataStore::new();
        let scope = TransactionScope::open(&store).await.unwrap();
        scope.handle().put("a/1", json!(1)).await.unwrap();
        scope.handle().put("b/1", json!(2)).await.unwrap();
        scope.commit_unless(false).await.unwrap();

        let scope = TransactionScope::open(&store).await.unwrap();
        let data = scope.handle();
        data.put("a/2", json!(3)).await.unwrap();
        data.delete("a/1").await.unwrap();
        assert_eq!(data.keys("a/").await.unwrap(), vec!["a/2"]);
        assert_eq!(data.keys("").await.unwrap(), vec!["a/2", "b/1"]);
    }

    #[tokio::test]
    async fn test_commit_failure_surfaces() {
        let store = MemoryDataStore::new();
        store.fail_commits();
        let scope = TransactionScope::open(&store).await.unwrap();
        scope.handle().put("k", json!(1)).await.unwrap();
        assert!(matches!(
            scope.commit_unless(false).await,
            Err(StoreError::Backend(_))
        ));
        assert!(store.snapshot().is_empty());
    }
}
