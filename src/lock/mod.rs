//! Cross-instance advisory locking.
//!
//! Several relay instances may share one relayer key. Sends of the same relayer are serialized
//! within a process by [`SendLocks`](crate::relayer::SendLocks) and across processes by an
//! advisory lock. The latter is best-effort: if the lock backend is unreachable, the caller
//! proceeds with the in-process lock only.

mod api;
pub use api::{AdvisoryLease, AdvisoryLockStore};

mod memory;
pub use memory::InMemoryLockStore;

mod pg;
pub use pg::PgAdvisoryLockStore;

use crate::error::LockStoreError;
use alloy::primitives::keccak256;
use std::sync::Arc;
use tracing::warn;

/// Maps a lock name to a 64 bit advisory lock key.
pub fn advisory_key(name: &str) -> i64 {
    let hash = keccak256(name.as_bytes());
    let mut key = [0u8; 8];
    key.copy_from_slice(&hash[..8]);
    i64::from_be_bytes(key)
}

/// Outcome of [`BestEffortLock::try_acquire`].
#[derive(Debug)]
pub enum LockOutcome {
    /// The lock is held until the lease is released.
    Acquired(Box<dyn AdvisoryLease>),
    /// The backend failed. The caller should continue without the lock.
    Unavailable(LockStoreError),
    /// No backend is configured.
    Disabled,
}

/// An advisory lock that fails open.
#[derive(Debug, Clone, Default)]
pub struct BestEffortLock {
    store: Option<Arc<dyn AdvisoryLockStore>>,
}

impl BestEffortLock {
    /// Creates a lock backed by `store`.
    pub fn new(store: Arc<dyn AdvisoryLockStore>) -> Self {
        Self { store: Some(store) }
    }

    /// Creates a lock that is never taken.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Whether a backend is configured.
    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Attempts to take the lock called `name`, waiting for other holders.
    pub async fn try_acquire(&self, name: &str) -> LockOutcome {
        let Some(store) = &self.store else { return LockOutcome::Disabled };
        match store.acquire(advisory_key(name)).await {
            Ok(lease) => LockOutcome::Acquired(lease),
            Err(err) => LockOutcome::Unavailable(err),
        }
    }

    /// Releases `lease`, logging failures.
    pub async fn release(lease: Box<dyn AdvisoryLease>) {
        if let Err(err) = lease.release().await {
            warn!(%err, "Failed to release advisory lock");
        }
    }
}
