//! Follower swap construction: tagged dispatch over the protocol set
//!
//! A build is a pure function of `(intent, follower params, cache snapshot)`
//! plus the chain reads needed to fill the cache. Output is a list of bare
//! instructions: no compute budget, no priority fee, no signatures. Every
//! account placed in an instruction is derivable from inputs, a known
//! constant, or read from the pool cache.

use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program,
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::aggregator_client::AggregatorClient;
use crate::bonding_curve_state::{self, BondingCurveState};
use crate::bonding_curve_swap;
use crate::chain_rpc::ChainRpc;
use crate::clmm_state::{self, ClmmPoolBundle, ClmmPoolState, TickArrayState};
use crate::clmm_swap;
use crate::constants;
use crate::cp_amm_state::{self, CpAmmPoolState};
use crate::cp_amm_swap;
use crate::cpmm_state::CpmmPoolState;
use crate::cpmm_swap;
use crate::damm_v2_state::DammV2PoolState;
use crate::damm_v2_swap;
use crate::dbc_state::DbcPoolState;
use crate::dbc_swap;
use crate::dlmm_state::DlmmPairState;
use crate::dlmm_swap;
use crate::error::BuildError;
use crate::launchpad_state::LaunchpadPoolState;
use crate::launchpad_swap;
use crate::pool_cache::{PoolCache, PoolState};
use crate::router_clone::clone_router_instruction;
use crate::types::{Direction, PoolDescriptor, SwapIntent};

/// SPL token account layout keeps the balance at offset 64
pub fn parse_token_amount(data: &[u8]) -> Result<u64, BuildError> {
    if data.len() < 72 {
        return Err(BuildError::PoolStateUnavailable(format!(
            "token account {} bytes, expected at least 72",
            data.len()
        )));
    }
    Ok(u64::from_le_bytes(data[64..72].try_into().expect("8 bytes")))
}

/// Apply a basis-point slippage bound to a quoted output
pub fn apply_slippage(amount_out: u64, slippage_bps: u16) -> u64 {
    ((amount_out as u128 * (10_000 - slippage_bps as u64) as u128) / 10_000u128) as u64
}

#[derive(Debug, Clone)]
pub struct BuiltSwap {
    pub instructions: Vec<Instruction>,
    /// Quoted output before the slippage bound, when the path quotes
    pub expected_out: Option<u64>,
}

pub struct SwapBuilder {
    rpc: Arc<dyn ChainRpc>,
    cache: Arc<PoolCache>,
    aggregator: Arc<AggregatorClient>,
}

impl SwapBuilder {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        cache: Arc<PoolCache>,
        aggregator: Arc<AggregatorClient>,
    ) -> Self {
        Self {
            rpc,
            cache,
            aggregator,
        }
    }

    pub fn cache(&self) -> &Arc<PoolCache> {
        &self.cache
    }

    /// Build the follower's swap for one intent.
    ///
    /// `amount_in` is the follower-denominated input (already scaled);
    /// direction and mints come from the intent.
    pub async fn build(
        &self,
        intent: &SwapIntent,
        follower: &Pubkey,
        amount_in: u64,
        slippage_bps: u16,
    ) -> Result<BuiltSwap, BuildError> {
        if amount_in == 0 {
            return Err(BuildError::ZeroQuote);
        }
        debug!(
            "building {} swap for follower {} amount {}",
            intent.protocol.name(),
            follower,
            amount_in
        );
        match &intent.pool_descriptor {
            PoolDescriptor::BondingCurve { mint, bonding_curve, .. } => {
                self.build_bonding_curve(intent, follower, amount_in, slippage_bps, mint, bonding_curve)
                    .await
            }
            PoolDescriptor::ConstantProductAmm { amm_id } => {
                self.build_cp_amm(intent, follower, amount_in, slippage_bps, amm_id)
                    .await
            }
            PoolDescriptor::ConcentratedLiquidity { pool, .. } => {
                self.build_clmm(intent, follower, amount_in, slippage_bps, pool)
                    .await
            }
            PoolDescriptor::ConstantProductAmmV2 { pool, .. } => {
                self.build_cpmm(intent, follower, amount_in, slippage_bps, pool)
                    .await
            }
            PoolDescriptor::LaunchpadCurve { pool, .. } => {
                self.build_launchpad(intent, follower, amount_in, slippage_bps, pool)
                    .await
            }
            PoolDescriptor::BinLiquidity { lb_pair, .. } => {
                self.build_dlmm(intent, follower, amount_in, slippage_bps, lb_pair)
                    .await
            }
            PoolDescriptor::DynamicBondingCurve { virtual_pool, .. } => {
                self.build_dbc(intent, follower, amount_in, slippage_bps, virtual_pool)
                    .await
            }
            PoolDescriptor::DynamicCpAmm { pool } => {
                self.build_damm_v2(intent, follower, amount_in, slippage_bps, pool)
                    .await
            }
            PoolDescriptor::Router { instruction_index } => {
                let instruction = clone_router_instruction(
                    &self.rpc,
                    intent,
                    *instruction_index,
                    follower,
                    amount_in,
                )
                .await?;
                Ok(BuiltSwap {
                    instructions: vec![instruction],
                    expected_out: None,
                })
            }
            PoolDescriptor::External => {
                let instructions = self
                    .aggregator
                    .fetch_swap_instructions(
                        &self.rpc,
                        &intent.input_mint,
                        &intent.output_mint,
                        amount_in,
                        follower,
                        slippage_bps,
                    )
                    .await?;
                Ok(BuiltSwap {
                    instructions,
                    expected_out: None,
                })
            }
        }
    }

    async fn build_bonding_curve(
        &self,
        intent: &SwapIntent,
        follower: &Pubkey,
        amount_in: u64,
        slippage_bps: u16,
        mint: &Pubkey,
        bonding_curve: &Pubkey,
    ) -> Result<BuiltSwap, BuildError> {
        let rpc = self.rpc.clone();
        let mint = *mint;
        let curve_key = *bonding_curve;
        let entry = self
            .cache
            .get_or_fetch((intent.protocol, curve_key), || async move {
                let data = fetch_account_data(&rpc, &curve_key).await?;
                Ok(PoolState::BondingCurve(BondingCurveState::parse(
                    &mint, &data,
                )?))
            })
            .await?;
        let PoolState::BondingCurve(state) = &entry.state else {
            return Err(variant_mismatch());
        };

        match intent.direction {
            Direction::Buy => {
                // Max-cost semantics: the bound is the full scaled input
                let expected = state.quote_buy(amount_in);
                let swap = bonding_curve_swap::build_buy_instruction(state, follower, amount_in)?;
                let ata = create_ata_idempotent(follower, &state.mint, &spl_token::id());
                Ok(BuiltSwap {
                    instructions: vec![ata, swap],
                    expected_out: Some(expected),
                })
            }
            Direction::Sell => {
                let expected = state.quote_sell(amount_in);
                let min_out = apply_slippage(expected, slippage_bps);
                let swap = bonding_curve_swap::build_sell_instruction(
                    state, follower, amount_in, min_out,
                )?;
                Ok(BuiltSwap {
                    instructions: vec![swap],
                    expected_out: Some(expected),
                })
            }
        }
    }

    async fn build_cp_amm(
        &self,
        intent: &SwapIntent,
        follower: &Pubkey,
        amount_in: u64,
        slippage_bps: u16,
        amm_id: &Pubkey,
    ) -> Result<BuiltSwap, BuildError> {
        let rpc = self.rpc.clone();
        let amm_key = *amm_id;
        let entry = self
            .cache
            .get_or_fetch((intent.protocol, amm_key), || async move {
                let data = fetch_account_data(&rpc, &amm_key).await?;
                let state = CpAmmPoolState::parse(&amm_key, &data)?;
                let vaults =
                    fetch_many(&rpc, &[state.pool_coin_vault, state.pool_pc_vault]).await?;
                let coin = parse_token_amount(&vaults[0])?;
                let pc = parse_token_amount(&vaults[1])?;
                Ok(PoolState::ConstantProduct(state.with_reserves(coin, pc)))
            })
            .await?;
        let PoolState::ConstantProduct(state) = &entry.state else {
            return Err(variant_mismatch());
        };

        let (reserve_in, reserve_out) = state.reserves_for(&intent.input_mint)?;
        let min_out = cp_amm_state::quote_min_out(
            reserve_in,
            reserve_out,
            amount_in,
            state.fee_numerator,
            state.fee_denominator,
            slippage_bps,
        )?;
        let source = user_ata(follower, &intent.input_mint);
        let dest = user_ata(follower, &intent.output_mint);
        let swap = cp_amm_swap::build_swap_instruction(
            state, &source, &dest, follower, amount_in, min_out,
        )?;
        Ok(BuiltSwap {
            instructions: vec![
                create_ata_idempotent(follower, &intent.output_mint, &spl_token::id()),
                swap,
            ],
            expected_out: Some(min_out),
        })
    }

    async fn build_clmm(
        &self,
        intent: &SwapIntent,
        follower: &Pubkey,
        amount_in: u64,
        slippage_bps: u16,
        pool: &Pubkey,
    ) -> Result<BuiltSwap, BuildError> {
        let rpc = self.rpc.clone();
        let pool_key = *pool;
        let entry = self
            .cache
            .get_or_fetch((intent.protocol, pool_key), || async move {
                fetch_clmm_bundle(rpc, pool_key).await
            })
            .await?;
        let PoolState::Concentrated(bundle) = &entry.state else {
            return Err(variant_mismatch());
        };

        let zero_for_one = intent.input_mint == bundle.pool.token_mint_0;
        let fee_ppm = bundle.fee_rate_ppm.min(999_999);
        let net_in =
            ((amount_in as u128 * (1_000_000 - fee_ppm) as u128) / 1_000_000u128) as u64;
        let sim = clmm_state::simulate_swap(bundle, net_in, zero_for_one)?;
        let min_out = apply_slippage(sim.amount_out, slippage_bps);

        let source = user_ata(follower, &intent.input_mint);
        let dest = user_ata(follower, &intent.output_mint);
        let swap = clmm_swap::build_swap_instruction(
            bundle,
            &source,
            &dest,
            follower,
            amount_in,
            min_out,
            0,
            zero_for_one,
            &sim.tick_array_starts,
        )?;
        Ok(BuiltSwap {
            instructions: vec![
                create_ata_idempotent(follower, &intent.output_mint, &spl_token::id()),
                swap,
            ],
            expected_out: Some(sim.amount_out),
        })
    }

    async fn build_cpmm(
        &self,
        intent: &SwapIntent,
        follower: &Pubkey,
        amount_in: u64,
        slippage_bps: u16,
        pool: &Pubkey,
    ) -> Result<BuiltSwap, BuildError> {
        let rpc = self.rpc.clone();
        let pool_key = *pool;
        let entry = self
            .cache
            .get_or_fetch((intent.protocol, pool_key), || async move {
                let data = fetch_account_data(&rpc, &pool_key).await?;
                let state = CpmmPoolState::parse(&pool_key, &data)?;
                let extra = fetch_many(
                    &rpc,
                    &[state.amm_config, state.token_0_vault, state.token_1_vault],
                )
                .await?;
                let fee = CpmmPoolState::parse_config_fee(&extra[0])?;
                let reserve_0 = parse_token_amount(&extra[1])?;
                let reserve_1 = parse_token_amount(&extra[2])?;
                Ok(PoolState::ConstantProductV2(
                    state.with_reserves(reserve_0, reserve_1).with_fee(fee),
                ))
            })
            .await?;
        let PoolState::ConstantProductV2(state) = &entry.state else {
            return Err(variant_mismatch());
        };

        let min_out = state.quote_min_out(&intent.input_mint, amount_in, slippage_bps)?;
        let source = user_ata(follower, &intent.input_mint);
        let dest = user_ata(follower, &intent.output_mint);
        let swap = cpmm_swap::build_swap_instruction(
            state,
            &intent.input_mint,
            &source,
            &dest,
            follower,
            amount_in,
            min_out,
        )?;
        Ok(BuiltSwap {
            instructions: vec![
                create_ata_idempotent(follower, &intent.output_mint, &spl_token::id()),
                swap,
            ],
            expected_out: Some(min_out),
        })
    }

    async fn build_launchpad(
        &self,
        intent: &SwapIntent,
        follower: &Pubkey,
        amount_in: u64,
        slippage_bps: u16,
        pool: &Pubkey,
    ) -> Result<BuiltSwap, BuildError> {
        let rpc = self.rpc.clone();
        let pool_key = *pool;
        let entry = self
            .cache
            .get_or_fetch((intent.protocol, pool_key), || async move {
                let data = fetch_account_data(&rpc, &pool_key).await?;
                Ok(PoolState::Launchpad(LaunchpadPoolState::parse(
                    &pool_key, &data,
                )?))
            })
            .await?;
        let PoolState::Launchpad(state) = &entry.state else {
            return Err(variant_mismatch());
        };

        let expected = match intent.direction {
            Direction::Buy => state.quote_buy(amount_in),
            Direction::Sell => state.quote_sell(amount_in),
        };
        if expected == 0 {
            return Err(BuildError::ZeroQuote);
        }
        let min_out = apply_slippage(expected, slippage_bps);
        let user_base = user_ata(follower, &state.base_mint);
        let user_quote = user_ata(follower, &state.quote_mint);
        let swap = launchpad_swap::build_swap_instruction(
            state,
            intent.direction,
            &user_base,
            &user_quote,
            follower,
            amount_in,
            min_out,
        )?;
        Ok(BuiltSwap {
            instructions: vec![
                create_ata_idempotent(follower, &intent.output_mint, &spl_token::id()),
                swap,
            ],
            expected_out: Some(expected),
        })
    }

    async fn build_dlmm(
        &self,
        intent: &SwapIntent,
        follower: &Pubkey,
        amount_in: u64,
        slippage_bps: u16,
        lb_pair: &Pubkey,
    ) -> Result<BuiltSwap, BuildError> {
        let rpc = self.rpc.clone();
        let pair_key = *lb_pair;
        let entry = self
            .cache
            .get_or_fetch((intent.protocol, pair_key), || async move {
                let data = fetch_account_data(&rpc, &pair_key).await?;
                Ok(PoolState::BinLiquidity(DlmmPairState::parse(
                    &pair_key, &data,
                )?))
            })
            .await?;
        let PoolState::BinLiquidity(state) = &entry.state else {
            return Err(variant_mismatch());
        };

        let x_to_y = intent.input_mint == state.token_x_mint;
        let expected = state.quote(amount_in, x_to_y)?;
        let min_out = apply_slippage(expected, slippage_bps);
        let source = user_ata(follower, &intent.input_mint);
        let dest = user_ata(follower, &intent.output_mint);
        let swap = dlmm_swap::build_swap_instruction(
            state, &source, &dest, follower, amount_in, min_out,
        )?;
        Ok(BuiltSwap {
            instructions: vec![
                create_ata_idempotent(follower, &intent.output_mint, &spl_token::id()),
                swap,
            ],
            expected_out: Some(expected),
        })
    }

    async fn build_dbc(
        &self,
        intent: &SwapIntent,
        follower: &Pubkey,
        amount_in: u64,
        slippage_bps: u16,
        virtual_pool: &Pubkey,
    ) -> Result<BuiltSwap, BuildError> {
        let rpc = self.rpc.clone();
        let pool_key = *virtual_pool;
        let entry = self
            .cache
            .get_or_fetch((intent.protocol, pool_key), || async move {
                let data = fetch_account_data(&rpc, &pool_key).await?;
                let state = DbcPoolState::parse(&pool_key, &data)?;
                let config_data = fetch_account_data(&rpc, &state.config).await?;
                let fee = DbcPoolState::parse_config_fee(&config_data)?;
                Ok(PoolState::DynamicBonding(state.with_fee(fee)))
            })
            .await?;
        let PoolState::DynamicBonding(state) = &entry.state else {
            return Err(variant_mismatch());
        };

        let base_in = intent.input_mint == state.base_mint;
        let expected = state.quote(amount_in, base_in)?;
        let min_out = apply_slippage(expected, slippage_bps);
        let source = user_ata(follower, &intent.input_mint);
        let dest = user_ata(follower, &intent.output_mint);
        let swap = dbc_swap::build_swap_instruction(
            state, &source, &dest, follower, amount_in, min_out,
        )?;
        Ok(BuiltSwap {
            instructions: vec![
                create_ata_idempotent(follower, &intent.output_mint, &spl_token::id()),
                swap,
            ],
            expected_out: Some(expected),
        })
    }

    async fn build_damm_v2(
        &self,
        intent: &SwapIntent,
        follower: &Pubkey,
        amount_in: u64,
        slippage_bps: u16,
        pool: &Pubkey,
    ) -> Result<BuiltSwap, BuildError> {
        let rpc = self.rpc.clone();
        let pool_key = *pool;
        let entry = self
            .cache
            .get_or_fetch((intent.protocol, pool_key), || async move {
                let data = fetch_account_data(&rpc, &pool_key).await?;
                let state = DammV2PoolState::parse(&pool_key, &data)?;
                let vaults = fetch_many(&rpc, &[state.token_a_vault, state.token_b_vault]).await?;
                let reserve_a = parse_token_amount(&vaults[0])?;
                let reserve_b = parse_token_amount(&vaults[1])?;
                Ok(PoolState::DynamicCp(
                    state.with_reserves(reserve_a, reserve_b),
                ))
            })
            .await?;
        let PoolState::DynamicCp(state) = &entry.state else {
            return Err(variant_mismatch());
        };

        let a_to_b = intent.input_mint == state.token_a_mint;
        let expected = state.quote(amount_in, a_to_b)?;
        let min_out = apply_slippage(expected, slippage_bps);
        let source = user_ata(follower, &intent.input_mint);
        let dest = user_ata(follower, &intent.output_mint);
        let swap = damm_v2_swap::build_swap_instruction(
            state, &source, &dest, follower, amount_in, min_out,
        )?;
        let out_flag = if a_to_b {
            state.token_b_flag
        } else {
            state.token_a_flag
        };
        let out_program = DammV2PoolState::token_program_for(out_flag);
        Ok(BuiltSwap {
            instructions: vec![
                create_ata_idempotent(follower, &intent.output_mint, &out_program),
                swap,
            ],
            expected_out: Some(expected),
        })
    }
}

/// Pool state plus its sidecars in one batched read: config for the fee,
/// bitmap extension, and the tick arrays around the current price.
async fn fetch_clmm_bundle(
    rpc: Arc<dyn ChainRpc>,
    pool_key: Pubkey,
) -> Result<PoolState, BuildError> {
    let data = fetch_account_data(&rpc, &pool_key).await?;
    let pool = ClmmPoolState::parse(&pool_key, &data)?;

    let span = pool.ticks_per_array();
    let current = pool.tick_array_start(pool.tick_current);
    let starts: Vec<i32> = (-3..=3).map(|i| current + i * span).collect();
    let bitmap_key = clmm_state::derive_bitmap_extension(&pool_key);

    let mut keys = vec![pool.amm_config, bitmap_key];
    keys.extend(
        starts
            .iter()
            .map(|&s| clmm_state::derive_tick_array_address(&pool_key, s)),
    );
    let accounts = rpc
        .get_account_infos(
            &keys,
            solana_sdk::commitment_config::CommitmentConfig::confirmed(),
        )
        .await
        .map_err(|e| BuildError::Rpc(e.to_string()))?;

    let config_data = accounts[0]
        .as_ref()
        .ok_or_else(|| BuildError::PoolStateUnavailable("clmm config missing".into()))?;
    let fee_rate_ppm = clmm_state::parse_config_fee(&config_data.data)?;

    let bitmap = accounts[1]
        .as_ref()
        .map(|account| clmm_state::TickArrayBitmapExtension::parse(&bitmap_key, &account.data))
        .transpose()?;

    let mut tick_arrays: Vec<TickArrayState> = Vec::new();
    for (i, account) in accounts[2..].iter().enumerate() {
        if let Some(account) = account {
            tick_arrays.push(TickArrayState::parse(&keys[2 + i], &account.data)?);
        }
    }
    if tick_arrays.is_empty() {
        return Err(BuildError::PoolStateUnavailable(
            "no tick arrays around current price".into(),
        ));
    }

    Ok(PoolState::Concentrated(ClmmPoolBundle {
        pool,
        fee_rate_ppm,
        bitmap,
        tick_arrays,
    }))
}

async fn fetch_account_data(
    rpc: &Arc<dyn ChainRpc>,
    key: &Pubkey,
) -> Result<Vec<u8>, BuildError> {
    let accounts = rpc
        .get_account_infos(
            std::slice::from_ref(key),
            solana_sdk::commitment_config::CommitmentConfig::confirmed(),
        )
        .await
        .map_err(|e| BuildError::Rpc(e.to_string()))?;
    accounts
        .into_iter()
        .next()
        .flatten()
        .map(|account| account.data)
        .ok_or_else(|| BuildError::PoolStateUnavailable(format!("account {} missing", key)))
}

async fn fetch_many(
    rpc: &Arc<dyn ChainRpc>,
    keys: &[Pubkey],
) -> Result<Vec<Vec<u8>>, BuildError> {
    let accounts = rpc
        .get_account_infos(
            keys,
            solana_sdk::commitment_config::CommitmentConfig::confirmed(),
        )
        .await
        .map_err(|e| BuildError::Rpc(e.to_string()))?;
    let mut out = Vec::with_capacity(keys.len());
    for (key, account) in keys.iter().zip(accounts) {
        let account = account.ok_or_else(|| {
            BuildError::PoolStateUnavailable(format!("account {} missing", key))
        })?;
        out.push(account.data);
    }
    Ok(out)
}

fn variant_mismatch() -> BuildError {
    BuildError::PoolStateUnavailable("cached state variant does not match protocol".into())
}

/// Follower's associated token account for a mint
pub fn user_ata(wallet: &Pubkey, mint: &Pubkey) -> Pubkey {
    bonding_curve_state::derive_associated_token_account(wallet, mint, &spl_token::id())
}

/// Idempotent associated-token-account creation for the output side of a
/// buy into a mint the follower may never have held
pub fn create_ata_idempotent(
    wallet: &Pubkey,
    mint: &Pubkey,
    token_program: &Pubkey,
) -> Instruction {
    let ata_program = Pubkey::from_str(constants::ATA_PROGRAM_ID).expect("valid program id");
    let ata = bonding_curve_state::derive_associated_token_account(wallet, mint, token_program);
    Instruction {
        program_id: ata_program,
        accounts: vec![
            AccountMeta::new(*wallet, true),
            AccountMeta::new(ata, false),
            AccountMeta::new_readonly(*wallet, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(*token_program, false),
        ],
        // CreateIdempotent
        data: vec![1],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator_client::AggregatorClient;
    use crate::chain_rpc::{ConfirmationStatus, SimulationOutcome};
    use crate::cp_amm_state::synthetic_pool_data;
    use crate::error::ChainRpcError;
    use crate::metrics::Metrics;
    use crate::types::{Protocol, RawTransaction, TransactionMeta};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use solana_sdk::account::Account;
    use solana_sdk::commitment_config::CommitmentConfig;
    use solana_sdk::hash::Hash;
    use solana_sdk::message::VersionedMessage;
    use solana_sdk::signature::Signature;
    use solana_sdk::transaction::VersionedTransaction;
    use std::collections::HashMap;
    use std::time::{Duration, Instant};

    pub(crate) struct FixtureRpc {
        accounts: Mutex<HashMap<Pubkey, Account>>,
        pub reads: Mutex<usize>,
    }

    impl FixtureRpc {
        pub fn new() -> Self {
            Self {
                accounts: Mutex::new(HashMap::new()),
                reads: Mutex::new(0),
            }
        }

        pub fn put(&self, key: Pubkey, data: Vec<u8>) {
            self.accounts.lock().insert(
                key,
                Account {
                    lamports: 1,
                    data,
                    owner: Pubkey::new_unique(),
                    executable: false,
                    rent_epoch: 0,
                },
            );
        }
    }

    #[async_trait]
    impl ChainRpc for FixtureRpc {
        async fn get_account_infos(
            &self,
            pubkeys: &[Pubkey],
            _commitment: CommitmentConfig,
        ) -> Result<Vec<Option<Account>>, ChainRpcError> {
            *self.reads.lock() += 1;
            let accounts = self.accounts.lock();
            Ok(pubkeys.iter().map(|k| accounts.get(k).cloned()).collect())
        }
        async fn get_latest_blockhash(&self) -> Result<(Hash, u64), ChainRpcError> {
            Ok((Hash::default(), 1))
        }
        async fn simulate_transaction(
            &self,
            _tx: &VersionedTransaction,
        ) -> Result<SimulationOutcome, ChainRpcError> {
            Ok(SimulationOutcome::default())
        }
        async fn send_transaction(
            &self,
            _tx: &VersionedTransaction,
        ) -> Result<Signature, ChainRpcError> {
            Ok(Signature::new_unique())
        }
        async fn confirm_signature(
            &self,
            _signature: &Signature,
            _timeout: Duration,
        ) -> Result<ConfirmationStatus, ChainRpcError> {
            Ok(ConfirmationStatus::Confirmed)
        }
        async fn get_transaction(
            &self,
            _signature: &Signature,
        ) -> Result<Option<RawTransaction>, ChainRpcError> {
            Ok(None)
        }
    }

    fn token_account_data(amount: u64) -> Vec<u8> {
        let mut data = vec![0u8; 165];
        data[64..72].copy_from_slice(&amount.to_le_bytes());
        data
    }

    fn cp_amm_intent(amm_id: Pubkey, coin_mint: Pubkey, pc_mint: Pubkey) -> SwapIntent {
        let raw = RawTransaction {
            signature: Signature::new_unique(),
            slot: 1,
            block_time: None,
            transaction: VersionedTransaction {
                signatures: vec![],
                message: VersionedMessage::Legacy(solana_sdk::message::Message::default()),
            },
            meta: TransactionMeta::default(),
            received_at: Instant::now(),
        };
        SwapIntent {
            master_signature: raw.signature,
            master_wallet: Pubkey::new_unique(),
            direction: Direction::Sell,
            input_mint: coin_mint,
            output_mint: pc_mint,
            master_input_amount: 10_000_000_000,
            master_output_amount_observed: 1,
            protocol: Protocol::ConstantProductAmm,
            pool_descriptor: PoolDescriptor::ConstantProductAmm { amm_id },
            original_transaction: Arc::new(raw),
            observed_at: Instant::now(),
        }
    }

    fn builder_with(rpc: Arc<FixtureRpc>) -> SwapBuilder {
        let metrics = Metrics::new().unwrap();
        SwapBuilder::new(
            rpc,
            Arc::new(PoolCache::new(metrics)),
            Arc::new(AggregatorClient::new("http://127.0.0.1:0".into())),
        )
    }

    #[tokio::test]
    async fn test_cp_amm_build_quotes_against_fixture_reserves() {
        let amm_id = Pubkey::new_unique();
        let coin_mint = Pubkey::new_unique();
        let pc_mint = Pubkey::new_unique();
        let pool_data = synthetic_pool_data(&coin_mint, &pc_mint, 25, 10_000);
        let state = CpAmmPoolState::parse(&amm_id, &pool_data).unwrap();

        let rpc = Arc::new(FixtureRpc::new());
        rpc.put(amm_id, pool_data);
        rpc.put(state.pool_coin_vault, token_account_data(1_000_000_000_000));
        rpc.put(state.pool_pc_vault, token_account_data(500_000_000_000));

        let builder = builder_with(rpc);
        let follower = Pubkey::new_unique();
        let intent = cp_amm_intent(amm_id, coin_mint, pc_mint);

        let built = builder
            .build(&intent, &follower, 1_000_000_000, 100)
            .await
            .unwrap();
        // create-ATA then swap
        assert_eq!(built.instructions.len(), 2);
        let swap = &built.instructions[1];
        assert_eq!(swap.data.len(), 17);
        assert_eq!(&swap.data[9..17], &493_269_230u64.to_le_bytes());
    }

    #[tokio::test]
    async fn test_build_is_deterministic_for_one_cache_snapshot() {
        let amm_id = Pubkey::new_unique();
        let coin_mint = Pubkey::new_unique();
        let pc_mint = Pubkey::new_unique();
        let pool_data = synthetic_pool_data(&coin_mint, &pc_mint, 25, 10_000);
        let state = CpAmmPoolState::parse(&amm_id, &pool_data).unwrap();

        let rpc = Arc::new(FixtureRpc::new());
        rpc.put(amm_id, pool_data);
        rpc.put(state.pool_coin_vault, token_account_data(1_000_000_000_000));
        rpc.put(state.pool_pc_vault, token_account_data(500_000_000_000));

        let builder = builder_with(rpc.clone());
        let follower = Pubkey::new_unique();
        let intent = cp_amm_intent(amm_id, coin_mint, pc_mint);

        let first = builder
            .build(&intent, &follower, 1_000_000_000, 100)
            .await
            .unwrap();
        let reads_after_first = *rpc.reads.lock();
        let second = builder
            .build(&intent, &follower, 1_000_000_000, 100)
            .await
            .unwrap();

        // Same bytes out, no further chain reads: the cache snapshot decides
        assert_eq!(
            first.instructions[1].data,
            second.instructions[1].data
        );
        assert_eq!(*rpc.reads.lock(), reads_after_first);
    }

    #[tokio::test]
    async fn test_missing_pool_account_maps_to_pool_unavailable() {
        let rpc = Arc::new(FixtureRpc::new());
        let builder = builder_with(rpc);
        let intent = cp_amm_intent(
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
        );
        let err = builder
            .build(&intent, &Pubkey::new_unique(), 1_000, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::PoolStateUnavailable(_)));
    }

    #[test]
    fn test_parse_token_amount_reads_offset_64() {
        let data = token_account_data(123_456);
        assert_eq!(parse_token_amount(&data).unwrap(), 123_456);
        assert!(parse_token_amount(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_apply_slippage_rounds_down() {
        assert_eq!(apply_slippage(10_000, 100), 9_900);
        assert_eq!(apply_slippage(3, 100), 2);
        assert_eq!(apply_slippage(0, 100), 0);
    }

    #[test]
    fn test_create_ata_is_idempotent_variant() {
        let wallet = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let ix = create_ata_idempotent(&wallet, &mint, &spl_token::id());
        assert_eq!(ix.data, vec![1]);
        assert_eq!(ix.accounts.len(), 6);
        assert!(ix.accounts[0].is_signer);
        assert_eq!(ix.accounts[1].pubkey, user_ata(&wallet, &mint));
    }
}
