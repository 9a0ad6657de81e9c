//! Priority-fee policy: four tiers driven by a congestion signal
//!
//! The signal is an EWMA of observed confirmation latencies, re-evaluated on
//! a 30 s cadence. When MEV protection is on, a tip transfer to one of the
//! known tip accounts rides along with the compute-budget instructions.

use parking_lot::RwLock;
use solana_sdk::{instruction::Instruction, pubkey::Pubkey, system_instruction};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::constants;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeTier {
    Low,
    Normal,
    High,
    Ultra,
}

impl FeeTier {
    /// Compute-unit price for the tier, micro-lamports per unit
    pub fn unit_price_micro_lamports(&self) -> u64 {
        match self {
            FeeTier::Low => 1_000,
            FeeTier::Normal => 10_000,
            FeeTier::High => 100_000,
            FeeTier::Ultra => 1_000_000,
        }
    }
}

struct PolicyState {
    tier: FeeTier,
    latency_ewma_ms: f64,
}

/// Latency-driven tier selection shared by all executor tasks
#[derive(Clone)]
pub struct PriorityFeePolicy {
    state: Arc<RwLock<PolicyState>>,
}

impl PriorityFeePolicy {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(PolicyState {
                tier: FeeTier::Normal,
                latency_ewma_ms: 1_000.0,
            })),
        }
    }

    /// Feed one observed submit-to-confirm latency into the signal
    pub fn observe_confirm_latency(&self, latency: Duration) {
        let mut state = self.state.write();
        let sample = latency.as_millis() as f64;
        state.latency_ewma_ms = state.latency_ewma_ms * 0.8 + sample * 0.2;
    }

    /// Re-evaluate the tier; called on the refresh cadence
    pub fn refresh(&self) {
        let mut state = self.state.write();
        let tier = match state.latency_ewma_ms {
            ms if ms < 2_000.0 => FeeTier::Low,
            ms if ms < 5_000.0 => FeeTier::Normal,
            ms if ms < 10_000.0 => FeeTier::High,
            _ => FeeTier::Ultra,
        };
        if tier != state.tier {
            debug!(
                "priority fee tier {:?} -> {:?} (ewma {:.0} ms)",
                state.tier, tier, state.latency_ewma_ms
            );
            state.tier = tier;
        }
    }

    pub fn current_tier(&self) -> FeeTier {
        self.state.read().tier
    }

    pub fn compute_unit_price(&self) -> u64 {
        self.current_tier().unit_price_micro_lamports()
    }
}

impl Default for PriorityFeePolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Background refresh on the policy cadence
pub fn spawn_refresh_task(policy: PriorityFeePolicy, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            policy.refresh();
        }
    });
}

/// Tip transfer to a randomly chosen known tip account
pub fn tip_instruction(payer: &Pubkey, lamports: u64) -> Instruction {
    let account = constants::TIP_ACCOUNTS[fastrand::usize(..constants::TIP_ACCOUNTS.len())];
    let tip_account = Pubkey::from_str(account).expect("valid tip account");
    system_instruction::transfer(payer, &tip_account, lamports)
}
