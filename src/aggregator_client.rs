//! External aggregator fallback
//!
//! When a swap is recognized only by its balance deltas, the follower's leg
//! is requested fresh from an external aggregator HTTP API. The API returns
//! a whole serialized transaction; its instructions are extracted with the
//! message-header bitmap as the authority on flags, and the transaction is
//! rejected unless its signer set is exactly the follower's key.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use nonzero_ext::nonzero;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use solana_sdk::{
    instruction::Instruction, pubkey::Pubkey, transaction::VersionedTransaction,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::address_table::{expand_message_lookups, resolve_account_index, ExpandedLookups};
use crate::chain_rpc::ChainRpc;
use crate::dlmm_swap::strip_compute_budget;
use crate::error::BuildError;

#[derive(Debug, Deserialize)]
struct SwapResponse {
    #[serde(rename = "swapTransaction")]
    swap_transaction: String,
}

pub struct AggregatorClient {
    base_url: String,
    client: Client,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl AggregatorClient {
    pub fn new(base_url: String) -> Self {
        // Stay under the public tier: 4 rps with a small burst
        let quota = Quota::per_second(nonzero!(4u32)).allow_burst(nonzero!(8u32));
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .gzip(true)
            .build()
            .expect("reqwest client builds with static config");
        Self {
            base_url,
            client,
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Request a fresh swap plan and return its bare instructions
    pub async fn fetch_swap_instructions(
        &self,
        rpc: &Arc<dyn ChainRpc>,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount_in: u64,
        follower: &Pubkey,
        slippage_bps: u16,
    ) -> Result<Vec<Instruction>, BuildError> {
        if amount_in == 0 {
            return Err(BuildError::ZeroQuote);
        }
        self.limiter.until_ready().await;

        let request = json!({
            "inputMint": input_mint.to_string(),
            "outputMint": output_mint.to_string(),
            "amount": amount_in,
            "userPublicKey": follower.to_string(),
            "slippageBps": slippage_bps,
            "wrapAndUnwrapSol": true,
        });
        debug!(
            "aggregator swap request {} -> {} ({})",
            input_mint, output_mint, amount_in
        );

        let response = self
            .client
            .post(format!("{}/swap", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| BuildError::Aggregator(format!("request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(BuildError::Aggregator(format!(
                "http {}",
                response.status()
            )));
        }
        let body: SwapResponse = response
            .json()
            .await
            .map_err(|e| BuildError::Aggregator(format!("bad response body: {}", e)))?;

        let tx = deserialize_transaction(&body.swap_transaction)?;
        let lookups = if tx.message.address_table_lookups().map_or(false, |l| !l.is_empty()) {
            expand_message_lookups(rpc, &tx.message).await?
        } else {
            ExpandedLookups::default()
        };
        extract_follower_instructions(&tx, follower, &lookups)
    }
}

/// Decode the base64 + bincode envelope the aggregator returns
pub fn deserialize_transaction(encoded: &str) -> Result<VersionedTransaction, BuildError> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| BuildError::Aggregator(format!("base64: {}", e)))?;
    bincode::deserialize(&bytes).map_err(|e| BuildError::Aggregator(format!("bincode: {}", e)))
}

/// Pull the instructions out of an aggregator transaction.
///
/// Signer and writable flags come from the compiled message header. The
/// transaction is rejected unless its signer set is exactly the follower;
/// anything else would have the follower co-sign for unknown keys.
/// Compute-budget instructions are dropped: the executor owns those.
pub fn extract_follower_instructions(
    tx: &VersionedTransaction,
    follower: &Pubkey,
    lookups: &ExpandedLookups,
) -> Result<Vec<Instruction>, BuildError> {
    let message = &tx.message;
    let static_keys = message.static_account_keys();
    let signer_count = message.header().num_required_signatures as usize;

    let signers: Vec<Pubkey> = static_keys.iter().take(signer_count).copied().collect();
    if signers != [*follower] {
        warn!(
            "aggregator transaction signer set {:?} is not the follower",
            signers
        );
        return Err(BuildError::Aggregator(
            "signer set is not exactly the follower".into(),
        ));
    }

    let mut instructions = Vec::new();
    for compiled in message.instructions() {
        let program_id = *static_keys
            .get(compiled.program_id_index as usize)
            .ok_or(BuildError::UnresolvedAccountIndex(compiled.program_id_index))?;
        let mut accounts = Vec::with_capacity(compiled.accounts.len());
        for &index in &compiled.accounts {
            let mut meta = resolve_account_index(index, message, lookups)?;
            meta.is_signer = (index as usize) < signer_count;
            accounts.push(meta);
        }
        instructions.push(Instruction {
            program_id,
            accounts,
            data: compiled.data.clone(),
        });
    }
    let instructions = strip_compute_budget(instructions);
    if instructions.is_empty() {
        return Err(BuildError::Aggregator("no swap instructions".into()));
    }
    Ok(instructions)
}
