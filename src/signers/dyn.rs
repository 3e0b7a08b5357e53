//! Multi-signer abstraction.
//!
//! A signer abstracted over local keys and AWS KMS keys.
use alloy::{
    network::{FullSigner, TxSigner},
    primitives::{Address, Signature},
    signers::{aws::AwsSigner, local::PrivateKeySigner},
};
use aws_config::BehaviorVersion;
use std::{fmt, ops::Deref, str::FromStr, sync::Arc};

/// Abstraction over the signers holding relayer and funding keys.
#[derive(Clone)]
pub struct DynSigner(pub Arc<dyn FullSigner<Signature> + Send + Sync>);

impl fmt::Debug for DynSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DynSigner").field(&self.address()).finish()
    }
}

impl DynSigner {
    /// Load a private key.
    pub async fn from_signing_key(key: &str) -> eyre::Result<Self> {
        Ok(Self(Arc::new(PrivateKeySigner::from_str(key)?)))
    }

    /// Load a signer from AWS KMS.
    pub async fn from_kms(key_id: &str, chain_id: Option<u64>) -> eyre::Result<Self> {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        let client = aws_sdk_kms::Client::new(&config);
        Ok(Self(Arc::new(AwsSigner::new(client, key_id.to_string(), chain_id).await?)))
    }

    /// Loads a signer from either a hex private key or an AWS KMS key id or ARN.
    pub async fn load(key: &str, chain_id: Option<u64>) -> eyre::Result<Self> {
        if is_kms_key(key) {
            return Self::from_kms(key, chain_id).await;
        }
        Self::from_signing_key(key).await
    }

    /// Creates a signer with a random local key.
    pub fn random() -> Self {
        Self(Arc::new(PrivateKeySigner::random()))
    }

    /// Returns the signer's Ethereum Address.
    pub fn address(&self) -> Address {
        TxSigner::address(&self.0)
    }
}

impl Deref for DynSigner {
    type Target = dyn FullSigner<Signature> + Send + Sync;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

/// KMS keys are referenced by ARN, alias or a UUID key id; private keys are 32 bytes of hex.
fn is_kms_key(key: &str) -> bool {
    key.starts_with("arn:") || key.starts_with("alias/") || (key.contains('-') && !key.starts_with("0x"))
}
