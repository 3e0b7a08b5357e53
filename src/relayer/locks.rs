use alloy::primitives::Address;
use alloy_chains::Chain;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Process-wide registry of send locks, one per chain and relaying identity.
///
/// Every [`Relayer`](super::Relayer) for the same chain and address shares one lock, so their
/// nonce reads and broadcasts never interleave.
#[derive(Debug, Clone, Default)]
pub struct SendLocks {
    locks: Arc<DashMap<(Chain, Address), Arc<Mutex<()>>>>,
}

impl SendLocks {
    /// Returns the lock of `address` on `chain`.
    pub fn get(&self, chain: Chain, address: Address) -> Arc<Mutex<()>> {
        self.locks.entry((chain, address)).or_default().clone()
    }
}
