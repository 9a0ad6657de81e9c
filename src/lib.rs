//! Real-time copy-trading engine for Solana
//!
//! This library provides:
//! - Stream ingress with signature dedup and reconnect handling
//! - A transaction analyzer that recognizes swaps across the supported DEXs
//! - Per-protocol swap instruction builders against live pool state
//! - A low-latency executor with simulation, priority fees and confirmation
//! - A coordinator joining master intents to the follower set

pub mod address_table;
pub mod aggregator_client;
pub mod analyzer;
pub mod blockhash_cache;
pub mod builder;
pub mod chain_rpc;
pub mod config_store;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod event_sink;
pub mod executor;
pub mod metrics;
pub mod pool_cache;
pub mod priority_fee;
pub mod router_clone;
pub mod signing;
pub mod stream_ingress;
pub mod stream_source;
pub mod types;

// Protocol state and instruction builders
pub mod bonding_curve_state;
pub mod bonding_curve_swap;
pub mod clmm_state;
pub mod clmm_swap;
pub mod cp_amm_state;
pub mod cp_amm_swap;
pub mod cpmm_state;
pub mod cpmm_swap;
pub mod damm_v2_state;
pub mod damm_v2_swap;
pub mod dbc_state;
pub mod dbc_swap;
pub mod dlmm_state;
pub mod dlmm_swap;
pub mod launchpad_state;
pub mod launchpad_swap;

// Re-export main types for convenience
pub use analyzer::Analyzer;
pub use builder::{BuiltSwap, SwapBuilder};
pub use chain_rpc::{ChainRpc, ConfirmationStatus, SimulationOutcome, SolanaRpc};
pub use config_store::{
    ChangeEvent, ConfigSnapshot, ConfigStore, FollowerEntry, JsonFileConfigStore,
    StaticConfigStore,
};
pub use coordinator::{ControlCommand, Coordinator, CoordinatorConfig};
pub use error::{
    AnalyzeError, BuildError, ChainRpcError, OutcomeStatus, RpcErrorKind, SkipReason,
};
pub use event_sink::{ChannelEventSink, EventSink, LogEventSink};
pub use executor::{Executor, ExecutorConfig};
pub use metrics::Metrics;
pub use pool_cache::{PoolCache, PoolCacheEntry, PoolKey, PoolState};
pub use priority_fee::{FeeTier, PriorityFeePolicy};
pub use signing::{LocalKeyring, SignerError, SigningOracle};
pub use stream_ingress::{spawn_stream_ingress, IngressConfig, IngressHandle};
pub use stream_source::{StreamSource, WsStreamSource};
pub use types::{
    Direction, FollowerId, LatencyBreakdown, PlanPhase, PlanSizing, PoolDescriptor, Protocol,
    RawTransaction, SwapIntent, TokenBalance, TradeOutcome, TradePlan, TransactionMeta,
};
