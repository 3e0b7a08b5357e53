use super::FundingInner;
use alloy::primitives::{Address, U256};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Work handed to the funding worker by fire-and-forget callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingMessage {
    /// Top up the relayer if it needs it.
    TopUp {
        /// Why the top-up is requested.
        reason: String,
    },
    /// Send a gas drip.
    Drip {
        /// Recipient of the drip.
        recipient: Address,
        /// Amount of the drip.
        amount: U256,
        /// Why the drip is requested.
        reason: String,
    },
}

/// Processes [`FundingMessage`]s until every sender is dropped.
///
/// Top-up requests queued behind each other are merged into one, since a single top-up refills
/// the relayer to its target.
pub(super) async fn run(inner: Arc<FundingInner>, mut rx: mpsc::UnboundedReceiver<FundingMessage>) {
    while let Some(message) = rx.recv().await {
        let mut drips = Vec::new();
        let mut topup = None;

        for message in std::iter::once(message).chain(std::iter::from_fn(|| rx.try_recv().ok())) {
            match message {
                FundingMessage::TopUp { reason } => {
                    if topup.is_some() {
                        trace!(chain = %inner.chain, %reason, "Coalescing top-up request");
                    } else {
                        topup = Some(reason);
                    }
                }
                drip @ FundingMessage::Drip { .. } => drips.push(drip),
            }
        }

        if let Some(reason) = topup {
            let outcome = inner.top_up(&reason).await;
            debug!(chain = %inner.chain, %reason, outcome = outcome.reason_code(), "Processed top-up request");
        }

        for drip in drips {
            if let FundingMessage::Drip { recipient, amount, reason } = drip {
                let outcome = inner.drip(recipient, amount, &reason).await;
                debug!(chain = %inner.chain, %recipient, %reason, outcome = outcome.reason_code(), "Processed drip request");
            }
        }
    }

    debug!(chain = %inner.chain, "Funding worker stopped");
}
