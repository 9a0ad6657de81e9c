//! Core data model shared across the pipeline
//!
//! Ownership flows with the pipeline: the ingress hands a `RawTransaction`
//! to the analyzer, the analyzer produces a `SwapIntent`, the coordinator
//! projects it into one `TradePlan` per follower, and the executor closes
//! each plan with exactly one `TradeOutcome`. No shared mutable graph;
//! cross-references are ids.

use chrono::{DateTime, Utc};
use serde::Serialize;
use solana_sdk::{
    instruction::CompiledInstruction, pubkey::Pubkey, signature::Signature,
    transaction::VersionedTransaction,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::constants;
use crate::error::OutcomeStatus;

/// Stable follower identifier assigned by the config store
pub type FollowerId = String;

/// Swap direction relative to the pool's quote side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// quote -> base
    Buy,
    /// base -> quote
    Sell,
}

/// Closed set of DEX variants the engine supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    BondingCurve,
    ConstantProductAmm,
    ConcentratedLiquidityAmm,
    ConstantProductAmmV2,
    LaunchpadCurve,
    BinLiquidityAmm,
    DynamicBondingCurve,
    DynamicCpAmm,
    RouterAggregator,
    ExternalAggregator,
}

impl Protocol {
    /// On-chain program for this protocol.
    ///
    /// `ExternalAggregator` has none: it is the fallback classification for
    /// recognizable swaps through unknown programs.
    pub fn program_id(&self) -> Option<Pubkey> {
        let id = match self {
            Protocol::BondingCurve => constants::BONDING_CURVE_PROGRAM_ID,
            Protocol::ConstantProductAmm => constants::CP_AMM_PROGRAM_ID,
            Protocol::ConcentratedLiquidityAmm => constants::CLMM_PROGRAM_ID,
            Protocol::ConstantProductAmmV2 => constants::CPMM_PROGRAM_ID,
            Protocol::LaunchpadCurve => constants::LAUNCHPAD_PROGRAM_ID,
            Protocol::BinLiquidityAmm => constants::DLMM_PROGRAM_ID,
            Protocol::DynamicBondingCurve => constants::DBC_PROGRAM_ID,
            Protocol::DynamicCpAmm => constants::DAMM_V2_PROGRAM_ID,
            Protocol::RouterAggregator => constants::ROUTER_PROGRAM_ID,
            Protocol::ExternalAggregator => return None,
        };
        Some(Pubkey::from_str(id).expect("program id constants are valid"))
    }

    /// Identify a protocol from an invoked program id
    pub fn from_program_id(program_id: &Pubkey) -> Option<Self> {
        let id = program_id.to_string();
        match id.as_str() {
            constants::BONDING_CURVE_PROGRAM_ID => Some(Protocol::BondingCurve),
            constants::CP_AMM_PROGRAM_ID => Some(Protocol::ConstantProductAmm),
            constants::CLMM_PROGRAM_ID => Some(Protocol::ConcentratedLiquidityAmm),
            constants::CPMM_PROGRAM_ID => Some(Protocol::ConstantProductAmmV2),
            constants::LAUNCHPAD_PROGRAM_ID => Some(Protocol::LaunchpadCurve),
            constants::DLMM_PROGRAM_ID => Some(Protocol::BinLiquidityAmm),
            constants::DBC_PROGRAM_ID => Some(Protocol::DynamicBondingCurve),
            constants::DAMM_V2_PROGRAM_ID => Some(Protocol::DynamicCpAmm),
            constants::ROUTER_PROGRAM_ID => Some(Protocol::RouterAggregator),
            _ => None,
        }
    }

    /// Routers lose the tie-break against native protocol programs
    pub fn is_router(&self) -> bool {
        matches!(
            self,
            Protocol::RouterAggregator | Protocol::ExternalAggregator
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Protocol::BondingCurve => "bonding_curve",
            Protocol::ConstantProductAmm => "cp_amm",
            Protocol::ConcentratedLiquidityAmm => "clmm",
            Protocol::ConstantProductAmmV2 => "cpmm",
            Protocol::LaunchpadCurve => "launchpad",
            Protocol::BinLiquidityAmm => "dlmm",
            Protocol::DynamicBondingCurve => "dbc",
            Protocol::DynamicCpAmm => "damm_v2",
            Protocol::RouterAggregator => "router",
            Protocol::ExternalAggregator => "external",
        }
    }
}

/// Token balance of one account before or after the transaction
#[derive(Debug, Clone)]
pub struct TokenBalance {
    pub account_index: u8,
    pub mint: Pubkey,
    pub owner: Pubkey,
    pub amount: u64,
}

/// Inner (CPI) instructions attached to one outer instruction
#[derive(Debug, Clone)]
pub struct InnerInstructionSet {
    pub outer_index: u8,
    pub instructions: Vec<CompiledInstruction>,
}

/// Execution metadata delivered alongside a confirmed transaction
#[derive(Debug, Clone, Default)]
pub struct TransactionMeta {
    pub err: Option<String>,
    pub log_messages: Vec<String>,
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
    pub pre_token_balances: Vec<TokenBalance>,
    pub post_token_balances: Vec<TokenBalance>,
    /// Accounts loaded through address-table lookups, writable set
    pub loaded_writable: Vec<Pubkey>,
    /// Accounts loaded through address-table lookups, readonly set
    pub loaded_readonly: Vec<Pubkey>,
    pub inner_instructions: Vec<InnerInstructionSet>,
}

/// One confirmed master-wallet transaction as delivered by the stream source
#[derive(Debug, Clone)]
pub struct RawTransaction {
    pub signature: Signature,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub transaction: VersionedTransaction,
    pub meta: TransactionMeta,
    /// Wall-clock arrival; the freshness horizon is measured from here
    pub received_at: Instant,
}

impl RawTransaction {
    /// Full account-key array: static keys augmented with address-table
    /// lookups, writable indices before readonly per the message format.
    pub fn resolved_account_keys(&self) -> Vec<Pubkey> {
        let mut keys = self.transaction.message.static_account_keys().to_vec();
        keys.extend_from_slice(&self.meta.loaded_writable);
        keys.extend_from_slice(&self.meta.loaded_readonly);
        keys
    }

    /// Whether the message references lookup tables the meta did not resolve
    pub fn has_unresolved_lookups(&self) -> bool {
        let lookups = self
            .transaction
            .message
            .address_table_lookups()
            .map(|l| {
                l.iter()
                    .map(|t| t.writable_indexes.len() + t.readonly_indexes.len())
                    .sum::<usize>()
            })
            .unwrap_or(0);
        lookups > self.meta.loaded_writable.len() + self.meta.loaded_readonly.len()
    }
}

/// Protocol-specific bundle of accounts a builder needs for one pool
#[derive(Debug, Clone, PartialEq)]
pub enum PoolDescriptor {
    BondingCurve {
        mint: Pubkey,
        bonding_curve: Pubkey,
        associated_bonding_curve: Pubkey,
        creator_vault: Pubkey,
    },
    ConstantProductAmm {
        amm_id: Pubkey,
    },
    ConcentratedLiquidity {
        pool: Pubkey,
        amm_config: Pubkey,
        observation: Pubkey,
        bitmap_extension: Pubkey,
    },
    ConstantProductAmmV2 {
        pool: Pubkey,
        amm_config: Pubkey,
        observation: Pubkey,
    },
    LaunchpadCurve {
        pool: Pubkey,
        global_config: Pubkey,
        platform_config: Pubkey,
    },
    BinLiquidity {
        lb_pair: Pubkey,
        oracle: Pubkey,
        bin_arrays: Vec<Pubkey>,
    },
    DynamicBondingCurve {
        virtual_pool: Pubkey,
        config: Pubkey,
    },
    DynamicCpAmm {
        pool: Pubkey,
    },
    /// Index of the master's router call among the outer instructions
    Router {
        instruction_index: usize,
    },
    /// The fallback path rebuilds from mints alone
    External,
}

impl PoolDescriptor {
    pub fn protocol(&self) -> Protocol {
        match self {
            PoolDescriptor::BondingCurve { .. } => Protocol::BondingCurve,
            PoolDescriptor::ConstantProductAmm { .. } => Protocol::ConstantProductAmm,
            PoolDescriptor::ConcentratedLiquidity { .. } => Protocol::ConcentratedLiquidityAmm,
            PoolDescriptor::ConstantProductAmmV2 { .. } => Protocol::ConstantProductAmmV2,
            PoolDescriptor::LaunchpadCurve { .. } => Protocol::LaunchpadCurve,
            PoolDescriptor::BinLiquidity { .. } => Protocol::BinLiquidityAmm,
            PoolDescriptor::DynamicBondingCurve { .. } => Protocol::DynamicBondingCurve,
            PoolDescriptor::DynamicCpAmm { .. } => Protocol::DynamicCpAmm,
            PoolDescriptor::Router { .. } => Protocol::RouterAggregator,
            PoolDescriptor::External => Protocol::ExternalAggregator,
        }
    }

    /// Primary pool account, used as the pool-cache key where applicable
    pub fn pool_address(&self) -> Option<Pubkey> {
        match self {
            PoolDescriptor::BondingCurve { bonding_curve, .. } => Some(*bonding_curve),
            PoolDescriptor::ConstantProductAmm { amm_id } => Some(*amm_id),
            PoolDescriptor::ConcentratedLiquidity { pool, .. } => Some(*pool),
            PoolDescriptor::ConstantProductAmmV2 { pool, .. } => Some(*pool),
            PoolDescriptor::LaunchpadCurve { pool, .. } => Some(*pool),
            PoolDescriptor::BinLiquidity { lb_pair, .. } => Some(*lb_pair),
            PoolDescriptor::DynamicBondingCurve { virtual_pool, .. } => Some(*virtual_pool),
            PoolDescriptor::DynamicCpAmm { pool } => Some(*pool),
            PoolDescriptor::Router { .. } | PoolDescriptor::External => None,
        }
    }
}

/// The analyzer's output for one recognized master swap
#[derive(Debug, Clone)]
pub struct SwapIntent {
    pub master_signature: Signature,
    pub master_wallet: Pubkey,
    pub direction: Direction,
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    /// Raw input units the master spent
    pub master_input_amount: u64,
    /// Raw output units observed from pre/post balances
    pub master_output_amount_observed: u64,
    pub protocol: Protocol,
    pub pool_descriptor: PoolDescriptor,
    /// Retained for builders that clone instructions from the original
    pub original_transaction: Arc<RawTransaction>,
    pub observed_at: Instant,
}

impl SwapIntent {
    /// Structural invariants every emitted intent satisfies
    pub fn check_invariants(&self) -> bool {
        self.input_mint != self.output_mint
            && self.master_input_amount > 0
            && self.pool_descriptor.protocol() == self.protocol
    }
}

/// How the follower's input amount is determined at execution time.
///
/// Buys are sized from the follower's configured input, never the master's.
/// Sells are a fraction of the follower's live holding of the sold mint,
/// read from chain when the plan executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSizing {
    /// Already capped at the follower's per-trade maximum
    BuyExactIn { amount: u64 },
    /// Fraction of the follower's current holding, in basis points
    SellFraction { fraction_bps: u16 },
}

/// One (intent, follower) pairing queued for execution
#[derive(Debug, Clone)]
pub struct TradePlan {
    pub plan_id: Uuid,
    pub follower_id: FollowerId,
    pub key_handle: String,
    pub follower_pubkey: Pubkey,
    pub intent: Arc<SwapIntent>,
    pub sizing: PlanSizing,
    pub slippage_bps: u16,
    pub deadline: Instant,
}

impl TradePlan {
    pub fn deadline_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Non-terminal phases of a plan's execution state machine.
///
/// `Queued -> Building -> Assembled -> Simulated -> Submitted`, then one of
/// the terminal `OutcomeStatus` values. No cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PlanPhase {
    Queued,
    Building,
    Assembled,
    Simulated,
    Submitted,
}

/// Per-phase wall-clock accounting carried on the outcome
#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencyBreakdown {
    pub queue_ms: u64,
    pub build_ms: u64,
    pub assemble_ms: u64,
    pub simulate_ms: u64,
    pub submit_ms: u64,
    pub confirm_ms: u64,
    pub total_ms: u64,
}

/// Terminal record emitted exactly once per plan
#[derive(Debug, Clone, Serialize)]
pub struct TradeOutcome {
    pub plan_id: Uuid,
    pub follower_id: FollowerId,
    pub master_signature: String,
    pub submitted_signature: Option<String>,
    pub status_label: String,
    pub error_detail: Option<String>,
    pub latency: LatencyBreakdown,
    pub emitted_at: DateTime<Utc>,
    #[serde(skip)]
    pub status: OutcomeStatus,
}

impl TradeOutcome {
    pub fn new(plan: &TradePlan, status: OutcomeStatus) -> Self {
        Self {
            plan_id: plan.plan_id,
            follower_id: plan.follower_id.clone(),
            master_signature: plan.intent.master_signature.to_string(),
            submitted_signature: None,
            status_label: status.label(),
            error_detail: None,
            latency: LatencyBreakdown::default(),
            emitted_at: Utc::now(),
            status,
        }
    }

    pub fn with_error(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.submitted_signature = Some(signature.to_string());
        self
    }

    pub fn with_latency(mut self, latency: LatencyBreakdown) -> Self {
        self.latency = latency;
        self
    }
}
