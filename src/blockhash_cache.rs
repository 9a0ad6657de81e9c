//! Per-master blockhash reuse window
//!
//! Followers mirroring the same master assemble within milliseconds of each
//! other; one latest-blockhash fetch serves them all for the reuse window.

use parking_lot::Mutex;
use solana_sdk::{hash::Hash, pubkey::Pubkey};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::chain_rpc::ChainRpc;
use crate::constants;
use crate::error::ChainRpcError;

#[derive(Clone)]
struct CachedHash {
    hash: Hash,
    last_valid_block_height: u64,
    fetched_at: Instant,
}

#[derive(Clone)]
pub struct BlockhashCache {
    entries: Arc<Mutex<HashMap<Pubkey, CachedHash>>>,
    max_age: Duration,
}

impl BlockhashCache {
    pub fn new() -> Self {
        Self::with_max_age(constants::BLOCKHASH_MAX_AGE)
    }

    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            max_age,
        }
    }

    /// Blockhash for transactions mirroring `master`, at most `max_age` old
    pub async fn get(
        &self,
        rpc: &Arc<dyn ChainRpc>,
        master: &Pubkey,
    ) -> Result<(Hash, u64), ChainRpcError> {
        {
            let entries = self.entries.lock();
            if let Some(cached) = entries.get(master) {
                if cached.fetched_at.elapsed() <= self.max_age {
                    return Ok((cached.hash, cached.last_valid_block_height));
                }
            }
        }
        self.refresh(rpc, master).await
    }

    /// Force a fresh fetch, e.g. after a blockhash-expired rejection
    pub async fn refresh(
        &self,
        rpc: &Arc<dyn ChainRpc>,
        master: &Pubkey,
    ) -> Result<(Hash, u64), ChainRpcError> {
        let (hash, last_valid_block_height) = rpc.get_latest_blockhash().await?;
        self.entries.lock().insert(
            *master,
            CachedHash {
                hash,
                last_valid_block_height,
                fetched_at: Instant::now(),
            },
        );
        Ok((hash, last_valid_block_height))
    }
}

impl Default for BlockhashCache {
    fn default() -> Self {
        Self::new()
    }
}
