use crate::error::LockStoreError;
use async_trait::async_trait;
use std::fmt::Debug;

/// A backend for named exclusive locks shared between relay instances.
#[async_trait]
pub trait AdvisoryLockStore: Debug + Send + Sync {
    /// Waits for the lock identified by `key` and returns a lease holding it.
    async fn acquire(&self, key: i64) -> Result<Box<dyn AdvisoryLease>, LockStoreError>;
}

/// A held advisory lock.
#[async_trait]
pub trait AdvisoryLease: Debug + Send {
    /// The key of the held lock.
    fn key(&self) -> i64;

    /// Releases the lock.
    async fn release(self: Box<Self>) -> Result<(), LockStoreError>;
}
