//! The execution relay.
//!
//! [`ExecutionRelay`] is the entry point of the crate: it routes each operation to the services
//! of the requested chain.

use crate::{
    chains::{Chain, Chains, SettlementChain},
    error::RelayError,
    funding::{DripOutcome, DripRequest, RelayerStatus},
    policy::{FundingPolicy, FundingPolicyRequest, FundingPolicyResult, RecoveryRecord, RecoveryTracker},
    queue::{EnqueueRequest, ExecutionQueue, QueueItem, QueueResponse},
    relayer::RelayRequest,
};
use alloy::primitives::{Address, B256};
use std::sync::Arc;
use tracing::instrument;

/// Relays executions and keeps the relayers funded.
#[derive(Debug, Clone)]
pub struct ExecutionRelay {
    chains: Chains,
    policy: FundingPolicy,
    queue: ExecutionQueue,
    recovery: RecoveryTracker,
}

impl ExecutionRelay {
    /// Creates a new relay.
    pub fn new(
        chains: Chains,
        policy: FundingPolicy,
        queue: ExecutionQueue,
        recovery: RecoveryTracker,
    ) -> Self {
        Self { chains, policy, queue, recovery }
    }

    /// The configured chains.
    pub fn chains(&self) -> &Chains {
        &self.chains
    }

    /// The execution queue.
    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }

    fn chain(&self, chain: SettlementChain) -> Result<Chain, RelayError> {
        self.chains.get(chain).ok_or_else(|| RelayError::unsupported_chain(chain))
    }

    /// Sends `request` from the relayer of `chain`.
    #[instrument(skip(self, request))]
    pub async fn send_relayed_tx(
        &self,
        chain: SettlementChain,
        request: RelayRequest,
    ) -> Result<B256, RelayError> {
        self.chain(chain)?.relayer.send(request).await
    }

    /// Decides how an execution is paid for.
    pub async fn execution_funding_policy(
        &self,
        request: FundingPolicyRequest,
    ) -> Result<FundingPolicyResult, RelayError> {
        self.policy.decide(request).await
    }

    /// Queues an execution until a relayer can afford it.
    pub fn enqueue_relayed_execution(
        &self,
        request: EnqueueRequest,
    ) -> Result<Arc<QueueItem>, RelayError> {
        self.queue.enqueue(request)
    }

    /// Answers a poll for the execution queued under `key`.
    pub fn get_relayed_execution_queue_response(&self, key: &str) -> QueueResponse {
        self.queue.get_response(key)
    }

    /// Returns the status of the relayer of `chain`.
    pub async fn get_relayer_status(
        &self,
        chain: SettlementChain,
    ) -> Result<RelayerStatus, RelayError> {
        self.chain(chain)?.funding.status().await
    }

    /// Sponsors gas of `recipient` on `chain`.
    #[instrument(skip(self, request))]
    pub async fn request_gas_drip(
        &self,
        chain: SettlementChain,
        recipient: Address,
        request: DripRequest,
    ) -> Result<DripOutcome, RelayError> {
        Ok(self.chain(chain)?.funding.drip(recipient, request).await)
    }

    /// The last way an execution was paid for, on any chain.
    pub fn last_recovery_mode(&self) -> Option<RecoveryRecord> {
        self.recovery.last()
    }
}
