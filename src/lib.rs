//! # Execution Relay
//!
//! Relayed transaction execution with funding orchestration.
//!
//! The crate is organised around a few per-chain services:
//!
//! - [`relayer::Relayer`] broadcasts transactions from a hot wallet, one nonce at a time.
//! - [`funding::FundingService`] keeps that wallet funded and sponsors small gas drips to users.
//! - [`policy::FundingPolicy`] decides how an execution should be paid for.
//! - [`queue::ExecutionQueue`] defers relayed executions until a relayer can afford them.
//!
//! [`relay::ExecutionRelay`] ties them together and [`spawn::try_spawn`] builds everything from a
//! [`config::RelayConfig`].

pub mod chains;
pub mod config;
pub mod constants;
pub mod error;
pub mod funding;
pub mod lock;
pub mod metrics;
pub mod policy;
pub mod provider;
pub mod queue;
pub mod relay;
pub mod relayer;
pub mod serde;
pub mod signers;
pub mod spawn;
