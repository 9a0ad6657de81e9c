//! Signing oracle interface and the local keyring implementation
//!
//! The pipeline never sees private key material; it hands a serialized
//! message to the oracle and gets a signature back. The local keyring exists
//! for single-host deployments and tests, loading base58 keypairs from the
//! environment.

use async_trait::async_trait;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
};
use std::collections::HashMap;
use std::fmt;
use tracing::info;

/// Signing failures; all map to `Skipped/Signer` at the plan level
#[derive(Debug, Clone, PartialEq)]
pub enum SignerError {
    UnknownKey(String),
    Unavailable(String),
}

impl fmt::Display for SignerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignerError::UnknownKey(handle) => write!(f, "unknown key handle: {}", handle),
            SignerError::Unavailable(msg) => write!(f, "signer unavailable: {}", msg),
        }
    }
}

impl std::error::Error for SignerError {}

#[async_trait]
pub trait SigningOracle: Send + Sync + 'static {
    /// Sign a canonical transaction message with the named key
    async fn sign(&self, key_handle: &str, message: &[u8]) -> Result<Signature, SignerError>;

    /// Public key behind a handle; builders place it in the signer slot
    async fn pubkey(&self, key_handle: &str) -> Result<Pubkey, SignerError>;
}

/// In-process keyring over base58-encoded keypairs
pub struct LocalKeyring {
    keys: HashMap<String, Keypair>,
}

impl LocalKeyring {
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }

    pub fn insert(&mut self, handle: impl Into<String>, keypair: Keypair) {
        let handle = handle.into();
        info!(
            "keyring loaded handle {} -> {}",
            handle,
            keypair.pubkey()
        );
        self.keys.insert(handle, keypair);
    }

    /// Load `handle=base58key` pairs, comma separated, from an env variable
    pub fn from_env(var: &str) -> anyhow::Result<Self> {
        let raw = std::env::var(var)
            .map_err(|_| anyhow::anyhow!("{} not found in environment", var))?;
        let mut keyring = Self::new();
        for pair in raw.split(',').filter(|p| !p.trim().is_empty()) {
            let (handle, key) = pair
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("malformed keyring entry, want handle=key"))?;
            keyring.insert(handle.trim(), Keypair::from_base58_string(key.trim()));
        }
        if keyring.keys.is_empty() {
            anyhow::bail!("{} contained no keypairs", var);
        }
        Ok(keyring)
    }
}

impl Default for LocalKeyring {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SigningOracle for LocalKeyring {
    async fn sign(&self, key_handle: &str, message: &[u8]) -> Result<Signature, SignerError> {
        let keypair = self
            .keys
            .get(key_handle)
            .ok_or_else(|| SignerError::UnknownKey(key_handle.to_string()))?;
        Ok(keypair.sign_message(message))
    }

    async fn pubkey(&self, key_handle: &str) -> Result<Pubkey, SignerError> {
        self.keys
            .get(key_handle)
            .map(|k| k.pubkey())
            .ok_or_else(|| SignerError::UnknownKey(key_handle.to_string()))
    }
}
