//! Chain access used by the relay services.
//!
//! Everything the relayer, the funding service and the policy engine need from a node goes
//! through [`ChainClient`], so the services can be exercised against in-memory chains.

use crate::{
    constants::RECEIPT_POLL_INTERVAL,
    error::{FailureBucket, RelayError},
    signers::DynSigner,
};
use alloy::{
    eips::eip2718::Encodable2718,
    network::{Ethereum, EthereumWallet, ReceiptResponse, TransactionBuilder},
    primitives::{Address, B256, Bytes, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::{client::ClientBuilder, types::TransactionRequest},
    transports::{TransportErrorKind, TransportResult, layers::RetryBackoffLayer},
};
use std::{fmt, time::Duration};
use tracing::{debug, instrument, warn};
use url::Url;

/// [`RetryBackoffLayer`] used for chain providers.
///
/// We are allowing max 10 retries with a backoff of 800ms. The CU/s is set to max value to avoid
/// any throttling.
pub const RETRY_LAYER: RetryBackoffLayer = RetryBackoffLayer::new(10, 800, u64::MAX);

/// Receipt of an included transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainReceipt {
    /// Hash of the transaction.
    pub tx_hash: B256,
    /// Whether the transaction succeeded.
    pub success: bool,
    /// Block the transaction was included in.
    pub block_number: Option<u64>,
}

/// Node operations used by the relay.
#[async_trait::async_trait]
pub trait ChainClient: fmt::Debug + Send + Sync {
    /// Returns the balance of `address` at the latest block.
    async fn get_balance(&self, address: Address) -> TransportResult<U256>;

    /// Returns the current gas price.
    async fn get_gas_price(&self) -> TransportResult<u128>;

    /// Returns the pending transaction count of `address`.
    async fn get_transaction_count(&self, address: Address) -> TransportResult<u64>;

    /// Estimates the gas used by `request`.
    async fn estimate_gas(&self, request: TransactionRequest) -> TransportResult<u64>;

    /// Signs `request` with `signer` and broadcasts it, returning the transaction hash.
    ///
    /// The request is expected to be fully populated, including nonce and gas parameters.
    async fn send_transaction(
        &self,
        signer: &DynSigner,
        request: TransactionRequest,
    ) -> TransportResult<B256>;

    /// Returns the receipt of `tx_hash` if the transaction was included.
    async fn get_transaction_receipt(&self, tx_hash: B256)
    -> TransportResult<Option<ChainReceipt>>;

    /// Executes `request` as a call against the latest block.
    async fn call(&self, request: TransactionRequest) -> TransportResult<Bytes>;
}

/// A [`ChainClient`] talking to a node over JSON-RPC.
#[derive(Debug, Clone)]
pub struct AlloyChainClient {
    provider: DynProvider,
}

impl AlloyChainClient {
    /// Creates a new client from an existing provider.
    pub fn new(provider: DynProvider) -> Self {
        Self { provider }
    }

    /// Connects to the node at `endpoint`, retrying transport failures with [`RETRY_LAYER`].
    pub async fn connect(endpoint: &Url) -> TransportResult<Self> {
        let client = ClientBuilder::default().layer(RETRY_LAYER).connect(endpoint.as_str()).await?;
        Ok(Self::new(ProviderBuilder::new().connect_client(client).erased()))
    }

    /// Returns the underlying provider.
    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }
}

#[async_trait::async_trait]
impl ChainClient for AlloyChainClient {
    async fn get_balance(&self, address: Address) -> TransportResult<U256> {
        self.provider.get_balance(address).await
    }

    async fn get_gas_price(&self) -> TransportResult<u128> {
        self.provider.get_gas_price().await
    }

    async fn get_transaction_count(&self, address: Address) -> TransportResult<u64> {
        self.provider.get_transaction_count(address).pending().await
    }

    async fn estimate_gas(&self, request: TransactionRequest) -> TransportResult<u64> {
        self.provider.estimate_gas(request).await
    }

    #[instrument(skip_all, fields(from = %signer.address()))]
    async fn send_transaction(
        &self,
        signer: &DynSigner,
        request: TransactionRequest,
    ) -> TransportResult<B256> {
        let wallet = EthereumWallet::new(signer.0.clone());
        let envelope = TransactionBuilder::<Ethereum>::build(request, &wallet)
            .await
            .map_err(TransportErrorKind::custom)?;

        let pending = self.provider.send_raw_transaction(&envelope.encoded_2718()).await?;
        debug!(tx_hash = %pending.tx_hash(), "Broadcasted transaction");

        Ok(*pending.tx_hash())
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: B256,
    ) -> TransportResult<Option<ChainReceipt>> {
        Ok(self.provider.get_transaction_receipt(tx_hash).await?.map(|receipt| ChainReceipt {
            tx_hash,
            success: receipt.status(),
            block_number: receipt.block_number,
        }))
    }

    async fn call(&self, request: TransactionRequest) -> TransportResult<Bytes> {
        self.provider.call(request).await
    }
}

/// Polls for the receipt of `tx_hash` until it is included or `timeout` elapses.
///
/// Returns `None` if the transaction is still pending after `timeout`. A reverted receipt is
/// reported as [`FailureBucket::ExecutionRevert`].
pub async fn wait_for_receipt(
    client: &dyn ChainClient,
    tx_hash: B256,
    timeout: Duration,
) -> Result<Option<ChainReceipt>, RelayError> {
    let Ok(receipt) = tokio::time::timeout(timeout, poll_receipt(client, tx_hash)).await else {
        return Ok(None);
    };

    if !receipt.success {
        return Err(RelayError::new(
            FailureBucket::ExecutionRevert,
            format!("transaction {tx_hash} reverted"),
        ));
    }

    Ok(Some(receipt))
}

async fn poll_receipt(client: &dyn ChainClient, tx_hash: B256) -> ChainReceipt {
    loop {
        match client.get_transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) => return receipt,
            Ok(None) => {}
            Err(err) => warn!(%tx_hash, %err, "Failed to fetch receipt"),
        }
        tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
    }
}
