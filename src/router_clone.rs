//! Router clone: byte-rewriting a master's aggregator call for a follower
//!
//! Some aggregators route through a program the analyzer cannot model
//! natively. Instead of rebuilding from protocol primitives, the master's
//! router instruction is cloned: the account list is re-resolved (static
//! keys, then table-expanded writable, then readonly), the master's signer
//! slot is replaced by the follower, and the unique little-endian amount
//! field is overwritten with the follower's scaled amount. A clone that
//! cannot locate a unique amount field fails hard; guessing would spend the
//! master's size from the follower's wallet.

use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;

use crate::address_table::{expand_message_lookups, resolve_account_index, ExpandedLookups};
use crate::chain_rpc::ChainRpc;
use crate::error::BuildError;
use crate::types::{RawTransaction, SwapIntent};

/// Find the unique offset of `amount` encoded little-endian in `data`.
pub fn locate_amount_field(data: &[u8], amount: u64) -> Result<usize, BuildError> {
    let needle = amount.to_le_bytes();
    let mut found: Option<usize> = None;
    if data.len() < 8 {
        return Err(BuildError::AmountFieldNotFound);
    }
    for offset in 0..=data.len() - 8 {
        if data[offset..offset + 8] == needle {
            if found.is_some() {
                return Err(BuildError::AmbiguousAmountField);
            }
            found = Some(offset);
        }
    }
    found.ok_or(BuildError::AmountFieldNotFound)
}

/// Clone the router call at `instruction_index` of the master transaction.
pub async fn clone_router_instruction(
    rpc: &Arc<dyn ChainRpc>,
    intent: &SwapIntent,
    instruction_index: usize,
    follower: &Pubkey,
    follower_amount: u64,
) -> Result<Instruction, BuildError> {
    if follower_amount == 0 {
        return Err(BuildError::ZeroQuote);
    }
    let raw = intent.original_transaction.as_ref();
    let message = &raw.transaction.message;
    let compiled = message
        .instructions()
        .get(instruction_index)
        .ok_or_else(|| BuildError::UnresolvedAccountIndex(instruction_index as u8))?;

    let lookups = lookups_for(rpc, raw).await?;

    let static_keys = message.static_account_keys();
    let program_id = *static_keys
        .get(compiled.program_id_index as usize)
        .ok_or(BuildError::UnresolvedAccountIndex(compiled.program_id_index))?;

    // Rebuild the account list index by index
    let mut accounts = Vec::with_capacity(compiled.accounts.len());
    for &index in &compiled.accounts {
        accounts.push(resolve_account_index(index, message, &lookups)?);
    }

    // Swap the master's signer slot for the follower
    let master_slot = accounts
        .iter()
        .position(|meta| meta.pubkey == intent.master_wallet)
        .ok_or(BuildError::MasterSignerNotFound)?;
    accounts[master_slot].pubkey = *follower;
    accounts[master_slot].is_signer = true;
    accounts[master_slot].is_writable = true;

    // Rewrite the amount field in place
    let mut data = compiled.data.clone();
    let offset = locate_amount_field(&data, intent.master_input_amount)?;
    data[offset..offset + 8].copy_from_slice(&follower_amount.to_le_bytes());
    tracing::debug!(
        "router clone rewrote offset {} of {}: {}",
        offset,
        intent.master_signature,
        hex::encode(&data[offset..offset + 8])
    );

    Ok(Instruction {
        program_id,
        accounts,
        data,
    })
}

/// Prefer the loaded addresses delivered with the transaction; fall back to
/// fetching and expanding the lookup tables.
async fn lookups_for(
    rpc: &Arc<dyn ChainRpc>,
    raw: &RawTransaction,
) -> Result<ExpandedLookups, BuildError> {
    if !raw.meta.loaded_writable.is_empty() || !raw.meta.loaded_readonly.is_empty() {
        return Ok(ExpandedLookups {
            writable: raw.meta.loaded_writable.clone(),
            readonly: raw.meta.loaded_readonly.clone(),
        });
    }
    if raw.has_unresolved_lookups() {
        return expand_message_lookups(rpc, &raw.transaction.message).await;
    }
    Ok(ExpandedLookups::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_rpc::{ChainRpc, ConfirmationStatus, SimulationOutcome};
    use crate::error::ChainRpcError;
    use crate::types::{
        Direction, PoolDescriptor, Protocol, TransactionMeta,
    };
    use async_trait::async_trait;
    use solana_sdk::account::Account;
    use solana_sdk::commitment_config::CommitmentConfig;
    use solana_sdk::hash::Hash;
    use solana_sdk::instruction::CompiledInstruction;
    use solana_sdk::message::{Message, MessageHeader, VersionedMessage};
    use solana_sdk::signature::Signature;
    use solana_sdk::transaction::VersionedTransaction;
    use std::str::FromStr;
    use std::time::Instant;

    struct NoRpc;

    #[async_trait]
    impl ChainRpc for NoRpc {
        async fn get_account_infos(
            &self,
            _pubkeys: &[Pubkey],
            _commitment: CommitmentConfig,
        ) -> Result<Vec<Option<Account>>, ChainRpcError> {
            Ok(vec![])
        }
        async fn get_latest_blockhash(&self) -> Result<(Hash, u64), ChainRpcError> {
            Err(ChainRpcError::permanent("unused"))
        }
        async fn simulate_transaction(
            &self,
            _tx: &VersionedTransaction,
        ) -> Result<SimulationOutcome, ChainRpcError> {
            Err(ChainRpcError::permanent("unused"))
        }
        async fn send_transaction(
            &self,
            _tx: &VersionedTransaction,
        ) -> Result<Signature, ChainRpcError> {
            Err(ChainRpcError::permanent("unused"))
        }
        async fn confirm_signature(
            &self,
            _signature: &Signature,
            _timeout: std::time::Duration,
        ) -> Result<ConfirmationStatus, ChainRpcError> {
            Err(ChainRpcError::permanent("unused"))
        }
        async fn get_transaction(
            &self,
            _signature: &Signature,
        ) -> Result<Option<RawTransaction>, ChainRpcError> {
            Ok(None)
        }
    }

    fn router_intent(master: Pubkey, data: Vec<u8>, master_amount: u64) -> SwapIntent {
        let router = Pubkey::from_str(crate::constants::ROUTER_PROGRAM_ID).unwrap();
        let pool = Pubkey::new_unique();
        let message = Message {
            header: MessageHeader {
                num_required_signatures: 1,
                num_readonly_signed_accounts: 0,
                num_readonly_unsigned_accounts: 1,
            },
            account_keys: vec![master, pool, router],
            recent_blockhash: Hash::default(),
            instructions: vec![CompiledInstruction {
                program_id_index: 2,
                accounts: vec![0, 1],
                data,
            }],
        };
        let raw = RawTransaction {
            signature: Signature::new_unique(),
            slot: 5,
            block_time: None,
            transaction: VersionedTransaction {
                signatures: vec![],
                message: VersionedMessage::Legacy(message),
            },
            meta: TransactionMeta::default(),
            received_at: Instant::now(),
        };
        SwapIntent {
            master_signature: raw.signature,
            master_wallet: master,
            direction: Direction::Buy,
            input_mint: Pubkey::new_unique(),
            output_mint: Pubkey::new_unique(),
            master_input_amount: master_amount,
            master_output_amount_observed: 1,
            protocol: Protocol::RouterAggregator,
            pool_descriptor: PoolDescriptor::Router {
                instruction_index: 0,
            },
            original_transaction: Arc::new(raw),
            observed_at: Instant::now(),
        }
    }

    #[test]
    fn test_locate_amount_requires_unique_match() {
        let mut data = vec![0xAAu8; 4];
        data.extend_from_slice(&10_000_000u64.to_le_bytes());
        data.extend_from_slice(&[0xBB; 3]);
        assert_eq!(locate_amount_field(&data, 10_000_000).unwrap(), 4);

        // A second copy of the pattern makes the field ambiguous
        let mut doubled = data.clone();
        doubled.extend_from_slice(&10_000_000u64.to_le_bytes());
        assert_eq!(
            locate_amount_field(&doubled, 10_000_000),
            Err(BuildError::AmbiguousAmountField)
        );

        assert_eq!(
            locate_amount_field(&data, 42),
            Err(BuildError::AmountFieldNotFound)
        );
    }

    #[tokio::test]
    async fn test_clone_rewrites_only_the_amount_bytes() {
        let master = Pubkey::new_unique();
        let follower = Pubkey::new_unique();
        let mut data = vec![0x01, 0x02, 0x03, 0x04];
        data.extend_from_slice(&10_000_000u64.to_le_bytes());
        data.extend_from_slice(&[0x05, 0x06]);
        let intent = router_intent(master, data.clone(), 10_000_000);

        let rpc: Arc<dyn ChainRpc> = Arc::new(NoRpc);
        let cloned = clone_router_instruction(&rpc, &intent, 0, &follower, 2_500_000)
            .await
            .unwrap();

        // Byte-identical except the eight bytes at the located offset
        assert_eq!(cloned.data.len(), data.len());
        assert_eq!(&cloned.data[0..4], &data[0..4]);
        assert_eq!(&cloned.data[4..12], &2_500_000u64.to_le_bytes());
        assert_eq!(&cloned.data[12..], &data[12..]);
    }

    #[tokio::test]
    async fn test_clone_substitutes_follower_as_signer() {
        let master = Pubkey::new_unique();
        let follower = Pubkey::new_unique();
        let mut data = vec![0u8; 2];
        data.extend_from_slice(&777u64.to_le_bytes());
        let intent = router_intent(master, data, 777);

        let rpc: Arc<dyn ChainRpc> = Arc::new(NoRpc);
        let cloned = clone_router_instruction(&rpc, &intent, 0, &follower, 55)
            .await
            .unwrap();

        assert_eq!(cloned.accounts[0].pubkey, follower);
        assert!(cloned.accounts[0].is_signer);
        assert!(cloned
            .accounts
            .iter()
            .all(|meta| meta.pubkey != master));
    }

    #[tokio::test]
    async fn test_clone_fails_without_amount_match() {
        let master = Pubkey::new_unique();
        let intent = router_intent(master, vec![0u8; 16], 999_999);
        let rpc: Arc<dyn ChainRpc> = Arc::new(NoRpc);
        let err = clone_router_instruction(&rpc, &intent, 0, &Pubkey::new_unique(), 55)
            .await
            .unwrap_err();
        // Zeroed data cannot match a nonzero master amount
        assert_eq!(err, BuildError::AmountFieldNotFound);
    }

    #[tokio::test]
    async fn test_clone_fails_when_master_not_in_accounts() {
        let master = Pubkey::new_unique();
        let mut data = vec![0u8; 2];
        data.extend_from_slice(&777u64.to_le_bytes());
        let mut intent = router_intent(master, data, 777);
        // Re-point the intent at a wallet that is not in the account list
        intent.master_wallet = Pubkey::new_unique();

        let rpc: Arc<dyn ChainRpc> = Arc::new(NoRpc);
        let err = clone_router_instruction(&rpc, &intent, 0, &Pubkey::new_unique(), 55)
            .await
            .unwrap_err();
        assert_eq!(err, BuildError::MasterSignerNotFound);
    }
}
