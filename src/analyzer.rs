//! Transaction analyzer: from a confirmed transaction to a `SwapIntent`
//!
//! Classification walks outer and inner instructions, resolving each
//! invoked program through the account-key array augmented with
//! address-table lookups. A native protocol program wins the tie against a
//! router; a recognizable balance delta with no known program at all falls
//! back to the external-aggregator path. Trade parameters come from the
//! master's pre/post balances, cross-checked against the little-endian
//! amount field where the instruction encodes one.

use once_cell::sync::Lazy;
use solana_sdk::{instruction::CompiledInstruction, pubkey::Pubkey};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::clmm_state;
use crate::constants;
use crate::error::AnalyzeError;
use crate::metrics::Metrics;
use crate::types::{
    Direction, PoolDescriptor, Protocol, RawTransaction, SwapIntent,
};

/// Lamport moves below this are fee noise, not a swap leg
const MIN_SWAP_LAMPORTS: u64 = 1_000_000;

/// Mints treated as the quote side when orienting a swap: wrapped SOL and
/// the major stables
static QUOTE_MINTS: Lazy<[Pubkey; 3]> = Lazy::new(|| {
    [
        Pubkey::from_str(constants::WSOL_MINT).expect("valid mint"),
        Pubkey::from_str("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v").expect("valid mint"),
        Pubkey::from_str("Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB").expect("valid mint"),
    ]
});

pub struct Analyzer {
    metrics: Metrics,
    quote_set: HashSet<Pubkey>,
}

impl Analyzer {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            metrics,
            quote_set: QUOTE_MINTS.iter().copied().collect(),
        }
    }

    /// `None` means "not a swap we mirror": non-swap traffic, an unknown
    /// protocol without a usable delta, a self-hop, or a failed transaction.
    pub fn analyze(
        &self,
        raw: &Arc<RawTransaction>,
        masters: &HashSet<Pubkey>,
    ) -> Result<Option<SwapIntent>, AnalyzeError> {
        if raw.meta.err.is_some() {
            return Ok(None);
        }
        if raw.has_unresolved_lookups() {
            return Err(AnalyzeError::IncompleteAccounts);
        }

        let keys = raw.resolved_account_keys();
        let Some(master) = keys.iter().find(|k| masters.contains(*k)).copied() else {
            return Ok(None);
        };

        let Some(delta) = self.master_delta(raw, &keys, &master) else {
            return Ok(None);
        };
        if delta.input_mint == delta.output_mint {
            debug!("self-hop for {} ignored", raw.signature);
            return Ok(None);
        }
        if delta.input_amount == 0 {
            return Ok(None);
        }

        let classified = classify(raw, &keys)?;
        let Some((protocol, outer_index, instruction)) = classified else {
            // Unknown program, but the master's balances moved like a swap
            debug!(
                "unknown-program swap for {} handled via aggregator fallback",
                raw.signature
            );
            self.metrics.intents_extracted.inc();
            return Ok(Some(self.intent_from(
                raw,
                master,
                delta,
                Protocol::ExternalAggregator,
                PoolDescriptor::External,
            )));
        };

        let descriptor = match protocol {
            Protocol::RouterAggregator => PoolDescriptor::Router {
                instruction_index: outer_index,
            },
            _ => extract_descriptor(protocol, &instruction, &keys)?,
        };

        // Cross-check the balance-derived input against the wire amount
        let mut delta = delta;
        if let Some(embedded) = embedded_amount(protocol, &instruction.data, delta.direction) {
            if embedded > 0 && embedded != delta.input_amount {
                debug!(
                    "amount cross-check for {}: balances {} wire {}",
                    raw.signature, delta.input_amount, embedded
                );
                delta.input_amount = embedded;
            }
        }

        self.metrics.intents_extracted.inc();
        Ok(Some(self.intent_from(raw, master, delta, protocol, descriptor)))
    }

    fn intent_from(
        &self,
        raw: &Arc<RawTransaction>,
        master: Pubkey,
        delta: MasterDelta,
        protocol: Protocol,
        descriptor: PoolDescriptor,
    ) -> SwapIntent {
        SwapIntent {
            master_signature: raw.signature,
            master_wallet: master,
            direction: delta.direction,
            input_mint: delta.input_mint,
            output_mint: delta.output_mint,
            master_input_amount: delta.input_amount,
            master_output_amount_observed: delta.output_amount,
            protocol,
            pool_descriptor: descriptor,
            original_transaction: raw.clone(),
            observed_at: Instant::now(),
        }
    }

    /// The master's net balance movement: what was spent, what was received.
    fn master_delta(
        &self,
        raw: &RawTransaction,
        keys: &[Pubkey],
        master: &Pubkey,
    ) -> Option<MasterDelta> {
        let mut by_mint: HashMap<Pubkey, i128> = HashMap::new();
        for balance in &raw.meta.pre_token_balances {
            if &balance.owner == master {
                *by_mint.entry(balance.mint).or_default() -= balance.amount as i128;
            }
        }
        for balance in &raw.meta.post_token_balances {
            if &balance.owner == master {
                *by_mint.entry(balance.mint).or_default() += balance.amount as i128;
            }
        }

        // Native lamports count as wrapped SOL for orientation
        if let Some(index) = keys.iter().position(|k| k == master) {
            let pre = raw.meta.pre_balances.get(index).copied().unwrap_or(0) as i128;
            let post = raw.meta.post_balances.get(index).copied().unwrap_or(0) as i128;
            let lamport_delta = post - pre;
            if lamport_delta.unsigned_abs() >= MIN_SWAP_LAMPORTS as u128 {
                let wsol = Pubkey::from_str(constants::WSOL_MINT).expect("valid mint");
                *by_mint.entry(wsol).or_default() += lamport_delta;
            }
        }

        let spent = by_mint
            .iter()
            .filter(|(_, d)| **d < 0)
            .max_by_key(|(_, d)| d.unsigned_abs())?;
        let received = by_mint
            .iter()
            .filter(|(_, d)| **d > 0)
            .max_by_key(|(_, d)| d.unsigned_abs())?;

        let input_mint = *spent.0;
        let output_mint = *received.0;
        let direction = if self.quote_set.contains(&input_mint) {
            Direction::Buy
        } else if self.quote_set.contains(&output_mint) {
            Direction::Sell
        } else {
            Direction::Buy
        };
        Some(MasterDelta {
            input_mint,
            output_mint,
            input_amount: spent.1.unsigned_abs() as u64,
            output_amount: received.1.unsigned_abs() as u64,
            direction,
        })
    }
}

struct MasterDelta {
    input_mint: Pubkey,
    output_mint: Pubkey,
    input_amount: u64,
    output_amount: u64,
    direction: Direction,
}

/// Walk outer and inner instructions, returning the winning classification:
/// `(protocol, outer instruction index, instruction)`. Native protocols beat
/// routers; the first native match wins.
fn classify(
    raw: &RawTransaction,
    keys: &[Pubkey],
) -> Result<Option<(Protocol, usize, CompiledInstruction)>, AnalyzeError> {
    let mut router: Option<(Protocol, usize, CompiledInstruction)> = None;

    let outer = raw.transaction.message.instructions();
    let mut scan = |outer_index: usize, instruction: &CompiledInstruction| -> Option<(Protocol, usize, CompiledInstruction)> {
        let program = keys.get(instruction.program_id_index as usize)?;
        let protocol = Protocol::from_program_id(program)?;
        if protocol.is_router() {
            if router.is_none() {
                router = Some((protocol, outer_index, instruction.clone()));
            }
            None
        } else {
            Some((protocol, outer_index, instruction.clone()))
        }
    };

    for (i, instruction) in outer.iter().enumerate() {
        if let Some(native) = scan(i, instruction) {
            return Ok(Some(native));
        }
    }
    for set in &raw.meta.inner_instructions {
        for instruction in &set.instructions {
            if let Some(native) = scan(set.outer_index as usize, instruction) {
                return Ok(Some(native));
            }
        }
    }
    // The router is ancillary context unless nothing native matched
    Ok(router)
}

/// Read the known account-index slots of the matched instruction into the
/// protocol's pool descriptor.
fn extract_descriptor(
    protocol: Protocol,
    instruction: &CompiledInstruction,
    keys: &[Pubkey],
) -> Result<PoolDescriptor, AnalyzeError> {
    let slot = |i: usize| -> Result<Pubkey, AnalyzeError> {
        let key_index = *instruction
            .accounts
            .get(i)
            .ok_or_else(|| AnalyzeError::Decode(format!("account slot {} out of range", i)))?;
        keys.get(key_index as usize)
            .copied()
            .ok_or_else(|| AnalyzeError::Decode(format!("account index {} unresolved", key_index)))
    };

    let descriptor = match protocol {
        Protocol::BondingCurve => {
            // Buys carry the creator vault at slot 9, sells at slot 8
            let is_buy = instruction
                .data
                .get(0..8)
                .map(|d| d == constants::BONDING_CURVE_BUY_DISCRIMINATOR)
                .unwrap_or(false);
            PoolDescriptor::BondingCurve {
                mint: slot(2)?,
                bonding_curve: slot(3)?,
                associated_bonding_curve: slot(4)?,
                creator_vault: slot(if is_buy { 9 } else { 8 })?,
            }
        }
        Protocol::ConstantProductAmm => PoolDescriptor::ConstantProductAmm { amm_id: slot(1)? },
        Protocol::ConcentratedLiquidityAmm => {
            let pool = slot(2)?;
            PoolDescriptor::ConcentratedLiquidity {
                amm_config: slot(1)?,
                observation: slot(7)?,
                bitmap_extension: clmm_state::derive_bitmap_extension(&pool),
                pool,
            }
        }
        Protocol::ConstantProductAmmV2 => PoolDescriptor::ConstantProductAmmV2 {
            amm_config: slot(2)?,
            pool: slot(3)?,
            observation: slot(12)?,
        },
        Protocol::LaunchpadCurve => PoolDescriptor::LaunchpadCurve {
            global_config: slot(2)?,
            platform_config: slot(3)?,
            pool: slot(4)?,
        },
        Protocol::BinLiquidityAmm => {
            let mut bin_arrays = Vec::new();
            for i in 15..instruction.accounts.len() {
                bin_arrays.push(slot(i)?);
            }
            PoolDescriptor::BinLiquidity {
                lb_pair: slot(0)?,
                oracle: slot(8)?,
                bin_arrays,
            }
        }
        Protocol::DynamicBondingCurve => PoolDescriptor::DynamicBondingCurve {
            config: slot(1)?,
            virtual_pool: slot(2)?,
        },
        Protocol::DynamicCpAmm => PoolDescriptor::DynamicCpAmm { pool: slot(1)? },
        Protocol::RouterAggregator | Protocol::ExternalAggregator => {
            warn!("descriptor extraction called for {:?}", protocol);
            return Err(AnalyzeError::Decode(
                "aggregator paths carry no pool descriptor".into(),
            ));
        }
    };
    Ok(descriptor)
}

/// Little-endian input amount at the protocol's documented data offset.
///
/// The bonding curve is the odd one out: buys encode the cost bound at
/// offset 16 (max-cost semantics), sells the token amount at offset 8.
fn embedded_amount(protocol: Protocol, data: &[u8], direction: Direction) -> Option<u64> {
    let offset = match protocol {
        Protocol::ConstantProductAmm => 1,
        Protocol::BondingCurve => match direction {
            Direction::Buy => 16,
            Direction::Sell => 8,
        },
        Protocol::ConcentratedLiquidityAmm
        | Protocol::ConstantProductAmmV2
        | Protocol::LaunchpadCurve
        | Protocol::BinLiquidityAmm
        | Protocol::DynamicBondingCurve
        | Protocol::DynamicCpAmm => 8,
        Protocol::RouterAggregator | Protocol::ExternalAggregator => return None,
    };
    let bytes = data.get(offset..offset + 8)?;
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TokenBalance, TransactionMeta};
    use solana_sdk::hash::Hash;
    use solana_sdk::message::{Message, MessageHeader, VersionedMessage};
    use solana_sdk::signature::Signature;
    use solana_sdk::transaction::VersionedTransaction;

    fn wsol() -> Pubkey {
        Pubkey::from_str(constants::WSOL_MINT).unwrap()
    }

    struct TxBuilder {
        master: Pubkey,
        account_keys: Vec<Pubkey>,
        instructions: Vec<CompiledInstruction>,
        meta: TransactionMeta,
    }

    impl TxBuilder {
        fn new(master: Pubkey) -> Self {
            Self {
                master,
                account_keys: vec![master],
                instructions: vec![],
                meta: TransactionMeta::default(),
            }
        }

        fn key(&mut self, key: Pubkey) -> u8 {
            if let Some(i) = self.account_keys.iter().position(|k| k == &key) {
                return i as u8;
            }
            self.account_keys.push(key);
            (self.account_keys.len() - 1) as u8
        }

        fn instruction(&mut self, program: Pubkey, accounts: Vec<Pubkey>, data: Vec<u8>) {
            let program_id_index = self.key(program);
            let accounts = accounts.into_iter().map(|a| self.key(a)).collect();
            self.instructions.push(CompiledInstruction {
                program_id_index,
                accounts,
                data,
            });
        }

        fn token_delta(&mut self, mint: Pubkey, pre: u64, post: u64) {
            self.meta.pre_token_balances.push(TokenBalance {
                account_index: 0,
                mint,
                owner: self.master,
                amount: pre,
            });
            self.meta.post_token_balances.push(TokenBalance {
                account_index: 0,
                mint,
                owner: self.master,
                amount: post,
            });
        }

        fn lamport_delta(&mut self, pre: u64, post: u64) {
            let n = self.account_keys.len();
            self.meta.pre_balances = vec![0; n];
            self.meta.post_balances = vec![0; n];
            self.meta.pre_balances[0] = pre;
            self.meta.post_balances[0] = post;
        }

        fn build(mut self) -> Arc<RawTransaction> {
            if self.meta.pre_balances.len() < self.account_keys.len() {
                self.meta.pre_balances.resize(self.account_keys.len(), 0);
                self.meta.post_balances.resize(self.account_keys.len(), 0);
            }
            let message = Message {
                header: MessageHeader {
                    num_required_signatures: 1,
                    num_readonly_signed_accounts: 0,
                    num_readonly_unsigned_accounts: 0,
                },
                account_keys: self.account_keys,
                recent_blockhash: Hash::default(),
                instructions: self.instructions,
            };
            Arc::new(RawTransaction {
                signature: Signature::new_unique(),
                slot: 10,
                block_time: Some(0),
                transaction: VersionedTransaction {
                    signatures: vec![],
                    message: VersionedMessage::Legacy(message),
                },
                meta: self.meta,
                received_at: Instant::now(),
            })
        }
    }

    fn analyzer() -> Analyzer {
        Analyzer::new(Metrics::new().unwrap())
    }

    fn masters_of(master: Pubkey) -> HashSet<Pubkey> {
        [master].into_iter().collect()
    }

    fn bonding_buy_accounts(mint: Pubkey, curve: Pubkey, abc: Pubkey, vault: Pubkey, master: Pubkey) -> Vec<Pubkey> {
        vec![
            Pubkey::new_unique(), // global
            Pubkey::new_unique(), // fee recipient
            mint,
            curve,
            abc,
            Pubkey::new_unique(), // associated user
            master,
            Pubkey::new_unique(), // system
            Pubkey::new_unique(), // token program
            vault,
            Pubkey::new_unique(), // event authority
            Pubkey::new_unique(), // program slot
        ]
    }

    #[test]
    fn test_bonding_curve_buy_extraction() {
        let master = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let curve = Pubkey::new_unique();
        let abc = Pubkey::new_unique();
        let vault = Pubkey::new_unique();

        let mut data = constants::BONDING_CURVE_BUY_DISCRIMINATOR.to_vec();
        data.extend_from_slice(&0u64.to_le_bytes());
        data.extend_from_slice(&1_000_000_000u64.to_le_bytes());

        let mut tx = TxBuilder::new(master);
        tx.instruction(
            Pubkey::from_str(constants::BONDING_CURVE_PROGRAM_ID).unwrap(),
            bonding_buy_accounts(mint, curve, abc, vault, master),
            data,
        );
        tx.token_delta(mint, 0, 5_000_000);
        tx.lamport_delta(10_000_000_000, 9_000_000_000);
        let raw = tx.build();

        let intent = analyzer()
            .analyze(&raw, &masters_of(master))
            .unwrap()
            .unwrap();
        assert_eq!(intent.protocol, Protocol::BondingCurve);
        assert_eq!(intent.direction, Direction::Buy);
        assert_eq!(intent.input_mint, wsol());
        assert_eq!(intent.output_mint, mint);
        // Wire bound takes precedence over the fee-polluted lamport delta
        assert_eq!(intent.master_input_amount, 1_000_000_000);
        match &intent.pool_descriptor {
            PoolDescriptor::BondingCurve {
                mint: m,
                bonding_curve,
                associated_bonding_curve,
                creator_vault,
            } => {
                assert_eq!(*m, mint);
                assert_eq!(*bonding_curve, curve);
                assert_eq!(*associated_bonding_curve, abc);
                assert_eq!(*creator_vault, vault);
            }
            other => panic!("wrong descriptor {:?}", other),
        }
        assert!(intent.check_invariants());
    }

    #[test]
    fn test_no_balance_change_is_ignored() {
        let master = Pubkey::new_unique();
        let mut tx = TxBuilder::new(master);
        tx.instruction(
            Pubkey::from_str(constants::CP_AMM_PROGRAM_ID).unwrap(),
            vec![Pubkey::new_unique(), Pubkey::new_unique()],
            vec![9],
        );
        let raw = tx.build();
        assert!(analyzer()
            .analyze(&raw, &masters_of(master))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_self_hop_is_ignored() {
        let master = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let mut tx = TxBuilder::new(master);
        tx.instruction(
            Pubkey::from_str(constants::CP_AMM_PROGRAM_ID).unwrap(),
            vec![Pubkey::new_unique(), Pubkey::new_unique()],
            vec![9],
        );
        // Same mint both spent and received nets to a single delta
        tx.token_delta(mint, 1_000, 1_000);
        let raw = tx.build();
        assert!(analyzer()
            .analyze(&raw, &masters_of(master))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_failed_transaction_is_ignored() {
        let master = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let mut tx = TxBuilder::new(master);
        tx.instruction(
            Pubkey::from_str(constants::CP_AMM_PROGRAM_ID).unwrap(),
            vec![Pubkey::new_unique(), Pubkey::new_unique()],
            vec![9],
        );
        tx.token_delta(mint, 0, 100);
        tx.lamport_delta(10_000_000_000, 9_000_000_000);
        tx.meta.err = Some("InstructionError".into());
        let raw = tx.build();
        assert!(analyzer()
            .analyze(&raw, &masters_of(master))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unknown_program_with_delta_falls_back_to_aggregator() {
        let master = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let mut tx = TxBuilder::new(master);
        tx.instruction(
            Pubkey::new_unique(),
            vec![Pubkey::new_unique()],
            vec![1, 2, 3],
        );
        tx.token_delta(mint, 0, 42_000);
        tx.lamport_delta(10_000_000_000, 8_000_000_000);
        let raw = tx.build();

        let intent = analyzer()
            .analyze(&raw, &masters_of(master))
            .unwrap()
            .unwrap();
        assert_eq!(intent.protocol, Protocol::ExternalAggregator);
        assert_eq!(intent.pool_descriptor, PoolDescriptor::External);
    }

    #[test]
    fn test_native_program_beats_router() {
        let master = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let amm_id = Pubkey::new_unique();
        let mut tx = TxBuilder::new(master);
        // Router outer call
        tx.instruction(
            Pubkey::from_str(constants::ROUTER_PROGRAM_ID).unwrap(),
            vec![master, Pubkey::new_unique()],
            1_000_000_000u64.to_le_bytes().to_vec(),
        );
        // Native CPI underneath
        let mut data = vec![9u8];
        data.extend_from_slice(&2_000_000_000u64.to_le_bytes());
        data.extend_from_slice(&0u64.to_le_bytes());
        let native = CompiledInstruction {
            program_id_index: tx.key(Pubkey::from_str(constants::CP_AMM_PROGRAM_ID).unwrap()),
            accounts: vec![tx.key(Pubkey::new_unique()), tx.key(amm_id)],
            data,
        };
        tx.meta.inner_instructions.push(crate::types::InnerInstructionSet {
            outer_index: 0,
            instructions: vec![native],
        });
        tx.token_delta(mint, 5_000_000, 0);
        tx.lamport_delta(8_000_000_000, 10_000_000_000);
        let raw = tx.build();

        let intent = analyzer()
            .analyze(&raw, &masters_of(master))
            .unwrap()
            .unwrap();
        assert_eq!(intent.protocol, Protocol::ConstantProductAmm);
        assert_eq!(
            intent.pool_descriptor,
            PoolDescriptor::ConstantProductAmm { amm_id }
        );
        assert_eq!(intent.direction, Direction::Sell);
        assert_eq!(intent.master_input_amount, 2_000_000_000);
    }

    #[test]
    fn test_router_alone_classifies_as_router() {
        let master = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let mut tx = TxBuilder::new(master);
        let mut data = vec![0xDE, 0xAD];
        data.extend_from_slice(&3_000_000u64.to_le_bytes());
        tx.instruction(
            Pubkey::from_str(constants::ROUTER_PROGRAM_ID).unwrap(),
            vec![master, Pubkey::new_unique()],
            data,
        );
        tx.token_delta(mint, 0, 9_000);
        tx.lamport_delta(10_000_000_000, 6_000_000_000);
        let raw = tx.build();

        let intent = analyzer()
            .analyze(&raw, &masters_of(master))
            .unwrap()
            .unwrap();
        assert_eq!(intent.protocol, Protocol::RouterAggregator);
        assert_eq!(
            intent.pool_descriptor,
            PoolDescriptor::Router {
                instruction_index: 0
            }
        );
    }

    #[test]
    fn test_unwatched_wallet_is_ignored() {
        let master = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let mut tx = TxBuilder::new(master);
        tx.instruction(
            Pubkey::from_str(constants::CP_AMM_PROGRAM_ID).unwrap(),
            vec![Pubkey::new_unique(), Pubkey::new_unique()],
            vec![9],
        );
        tx.token_delta(mint, 0, 100);
        tx.lamport_delta(10_000_000_000, 8_000_000_000);
        let raw = tx.build();
        assert!(analyzer()
            .analyze(&raw, &masters_of(Pubkey::new_unique()))
            .unwrap()
            .is_none());
    }
}
