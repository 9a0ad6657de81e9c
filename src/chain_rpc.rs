//! Chain RPC interface and the live Solana implementation
//!
//! The pipeline only ever talks to the chain through the `ChainRpc` trait so
//! tests can stand in an in-memory chain. The live implementation wraps the
//! nonblocking RPC client, with an optional dedicated low-latency endpoint
//! for submissions.

use async_trait::async_trait;
use solana_client::rpc_config::{RpcSendTransactionConfig, RpcSimulateTransactionConfig};
use solana_rpc_client::nonblocking::rpc_client::RpcClient;
use solana_rpc_client_api::config::RpcTransactionConfig;
use solana_sdk::{
    account::Account,
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use solana_transaction_status::{
    option_serializer::OptionSerializer, EncodedConfirmedTransactionWithStatusMeta, UiInstruction,
    UiTransactionEncoding,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::ChainRpcError;
use crate::types::{InnerInstructionSet, RawTransaction, TokenBalance, TransactionMeta};

/// Result of a pre-submit simulation
#[derive(Debug, Clone, Default)]
pub struct SimulationOutcome {
    pub units_consumed: Option<u64>,
    pub err: Option<String>,
    pub logs: Vec<String>,
}

impl SimulationOutcome {
    /// Program-log tail kept on a rejected plan, bounded
    pub fn log_tail(&self, max_bytes: usize) -> String {
        let mut tail = String::new();
        for line in self.logs.iter().rev() {
            if tail.len() + line.len() + 1 > max_bytes {
                break;
            }
            if tail.is_empty() {
                tail = line.clone();
            } else {
                tail = format!("{}\n{}", line, tail);
            }
        }
        tail
    }
}

/// Terminal status of a confirmation wait
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationStatus {
    Confirmed,
    Failed(String),
    TimedOut,
}

#[async_trait]
pub trait ChainRpc: Send + Sync + 'static {
    async fn get_account_infos(
        &self,
        pubkeys: &[Pubkey],
        commitment: CommitmentConfig,
    ) -> Result<Vec<Option<Account>>, ChainRpcError>;

    async fn get_latest_blockhash(&self) -> Result<(Hash, u64), ChainRpcError>;

    async fn simulate_transaction(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<SimulationOutcome, ChainRpcError>;

    /// Submit through the low-latency endpoint, preflight skipped
    async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<Signature, ChainRpcError>;

    async fn confirm_signature(
        &self,
        signature: &Signature,
        timeout: Duration,
    ) -> Result<ConfirmationStatus, ChainRpcError>;

    async fn get_transaction(
        &self,
        signature: &Signature,
    ) -> Result<Option<RawTransaction>, ChainRpcError>;
}

/// Live implementation over the Solana JSON-RPC
pub struct SolanaRpc {
    client: Arc<RpcClient>,
    /// Separate client for `send_transaction`; same as `client` when no
    /// dedicated submission endpoint is configured
    submit_client: Arc<RpcClient>,
    commitment: CommitmentConfig,
}

impl SolanaRpc {
    pub fn new(rpc_url: String, submit_url: Option<String>) -> Self {
        let client = Arc::new(RpcClient::new(rpc_url));
        let submit_client = match submit_url {
            Some(url) => Arc::new(RpcClient::new(url)),
            None => client.clone(),
        };
        Self {
            client,
            submit_client,
            commitment: CommitmentConfig::confirmed(),
        }
    }
}

#[async_trait]
impl ChainRpc for SolanaRpc {
    async fn get_account_infos(
        &self,
        pubkeys: &[Pubkey],
        commitment: CommitmentConfig,
    ) -> Result<Vec<Option<Account>>, ChainRpcError> {
        let response = self
            .client
            .get_multiple_accounts_with_commitment(pubkeys, commitment)
            .await
            .map_err(|e| ChainRpcError::classify(e.to_string()))?;
        Ok(response.value)
    }

    async fn get_latest_blockhash(&self) -> Result<(Hash, u64), ChainRpcError> {
        self.client
            .get_latest_blockhash_with_commitment(self.commitment)
            .await
            .map_err(|e| ChainRpcError::classify(e.to_string()))
    }

    async fn simulate_transaction(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<SimulationOutcome, ChainRpcError> {
        let config = RpcSimulateTransactionConfig {
            sig_verify: false,
            replace_recent_blockhash: false,
            commitment: Some(self.commitment),
            ..Default::default()
        };
        let response = self
            .client
            .simulate_transaction_with_config(tx, config)
            .await
            .map_err(|e| ChainRpcError::classify(e.to_string()))?;
        let value = response.value;
        Ok(SimulationOutcome {
            units_consumed: value.units_consumed,
            err: value.err.map(|e| format!("{:?}", e)),
            logs: value.logs.unwrap_or_default(),
        })
    }

    async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<Signature, ChainRpcError> {
        let config = RpcSendTransactionConfig {
            skip_preflight: true,
            max_retries: Some(0),
            ..Default::default()
        };
        self.submit_client
            .send_transaction_with_config(tx, config)
            .await
            .map_err(|e| ChainRpcError::classify(e.to_string()))
    }

    async fn confirm_signature(
        &self,
        signature: &Signature,
        timeout: Duration,
    ) -> Result<ConfirmationStatus, ChainRpcError> {
        let deadline = Instant::now() + timeout;
        loop {
            let statuses = self
                .client
                .get_signature_statuses(&[*signature])
                .await
                .map_err(|e| ChainRpcError::classify(e.to_string()))?;
            if let Some(Some(status)) = statuses.value.first() {
                if let Some(err) = &status.err {
                    return Ok(ConfirmationStatus::Failed(format!("{:?}", err)));
                }
                if status.satisfies_commitment(self.commitment) {
                    return Ok(ConfirmationStatus::Confirmed);
                }
            }
            if Instant::now() >= deadline {
                return Ok(ConfirmationStatus::TimedOut);
            }
            tokio::time::sleep(Duration::from_millis(400)).await;
        }
    }

    async fn get_transaction(
        &self,
        signature: &Signature,
    ) -> Result<Option<RawTransaction>, ChainRpcError> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };
        let encoded = match self
            .client
            .get_transaction_with_config(signature, config)
            .await
        {
            Ok(tx) => tx,
            Err(e) => {
                let msg = e.to_string();
                if msg.to_lowercase().contains("not found") {
                    return Ok(None);
                }
                return Err(ChainRpcError::classify(msg));
            }
        };
        match decode_confirmed_transaction(*signature, encoded) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) => {
                warn!("failed to decode transaction {}: {}", signature, e);
                Err(e)
            }
        }
    }
}

/// Convert the RPC's encoded transaction into the pipeline's `RawTransaction`
pub fn decode_confirmed_transaction(
    signature: Signature,
    encoded: EncodedConfirmedTransactionWithStatusMeta,
) -> Result<RawTransaction, ChainRpcError> {
    let slot = encoded.slot;
    let block_time = encoded.block_time;
    let transaction = encoded
        .transaction
        .transaction
        .decode()
        .ok_or_else(|| ChainRpcError::permanent("undecodable transaction payload"))?;

    let mut meta = TransactionMeta::default();
    if let Some(ui_meta) = encoded.transaction.meta {
        meta.err = ui_meta.err.map(|e| format!("{:?}", e));
        meta.pre_balances = ui_meta.pre_balances;
        meta.post_balances = ui_meta.post_balances;
        if let OptionSerializer::Some(logs) = ui_meta.log_messages {
            meta.log_messages = logs;
        }
        if let OptionSerializer::Some(balances) = ui_meta.pre_token_balances {
            meta.pre_token_balances = convert_token_balances(&balances);
        }
        if let OptionSerializer::Some(balances) = ui_meta.post_token_balances {
            meta.post_token_balances = convert_token_balances(&balances);
        }
        if let OptionSerializer::Some(loaded) = ui_meta.loaded_addresses {
            meta.loaded_writable = parse_pubkeys(&loaded.writable);
            meta.loaded_readonly = parse_pubkeys(&loaded.readonly);
        }
        if let OptionSerializer::Some(inner) = ui_meta.inner_instructions {
            for set in inner {
                let mut instructions = Vec::new();
                for instruction in set.instructions {
                    if let UiInstruction::Compiled(compiled) = instruction {
                        let data = bs58::decode(&compiled.data).into_vec().unwrap_or_default();
                        instructions.push(solana_sdk::instruction::CompiledInstruction {
                            program_id_index: compiled.program_id_index,
                            accounts: compiled.accounts,
                            data,
                        });
                    }
                }
                meta.inner_instructions.push(InnerInstructionSet {
                    outer_index: set.index,
                    instructions,
                });
            }
        }
    } else {
        debug!("transaction {} delivered without meta", signature);
    }

    Ok(RawTransaction {
        signature,
        slot,
        block_time,
        transaction,
        meta,
        received_at: Instant::now(),
    })
}

fn convert_token_balances(
    balances: &[solana_transaction_status::UiTransactionTokenBalance],
) -> Vec<TokenBalance> {
    balances
        .iter()
        .filter_map(|balance| {
            let mint = Pubkey::from_str(&balance.mint).ok()?;
            let owner = match &balance.owner {
                OptionSerializer::Some(owner) => Pubkey::from_str(owner).ok()?,
                _ => return None,
            };
            let amount = balance.ui_token_amount.amount.parse::<u64>().ok()?;
            Some(TokenBalance {
                account_index: balance.account_index,
                mint,
                owner,
                amount,
            })
        })
        .collect()
}

fn parse_pubkeys(keys: &[String]) -> Vec<Pubkey> {
    keys.iter()
        .filter_map(|key| Pubkey::from_str(key).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_tail_is_bounded_and_keeps_latest_lines() {
        let outcome = SimulationOutcome {
            units_consumed: Some(1),
            err: Some("custom program error".into()),
            logs: vec![
                "Program log: start".to_string(),
                "Program log: middle".to_string(),
                "Program log: slippage exceeded".to_string(),
            ],
        };
        let tail = outcome.log_tail(64);
        assert!(tail.contains("slippage exceeded"));
        assert!(tail.len() <= 64);

        let full = outcome.log_tail(4096);
        assert!(full.starts_with("Program log: start"));
        assert!(full.ends_with("slippage exceeded"));
    }
}
