use super::{AdvisoryLease, AdvisoryLockStore};
use crate::error::LockStoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// [`AdvisoryLockStore`] implementation in-memory. Used for testing and single instance setups.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLockStore {
    locks: Arc<DashMap<i64, Arc<Mutex<()>>>>,
}

impl InMemoryLockStore {
    /// Returns whether the lock for `key` is currently held.
    pub fn is_locked(&self, key: i64) -> bool {
        self.locks.get(&key).is_some_and(|lock| lock.try_lock().is_err())
    }
}

#[async_trait]
impl AdvisoryLockStore for InMemoryLockStore {
    async fn acquire(&self, key: i64) -> Result<Box<dyn AdvisoryLease>, LockStoreError> {
        let lock = self.locks.entry(key).or_default().clone();
        let guard = lock.lock_owned().await;
        Ok(Box::new(InMemoryLease { key, _guard: guard }))
    }
}

#[derive(Debug)]
struct InMemoryLease {
    key: i64,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl AdvisoryLease for InMemoryLease {
    fn key(&self) -> i64 {
        self.key
    }

    async fn release(self: Box<Self>) -> Result<(), LockStoreError> {
        Ok(())
    }
}
