//! Executor: from built instructions to a confirmed follower transaction
//!
//! State machine per plan:
//! `Queued -> Building -> Assembled -> Simulated -> Submitted ->
//! {Landed | Failed | TimedOut}`, with `Skipped` and `Simulated-Reject`
//! terminal exits along the way. Exactly one outcome is emitted per plan.

use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    hash::Hash,
    instruction::Instruction,
    message::{v0, VersionedMessage},
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::blockhash_cache::BlockhashCache;
use crate::builder::{parse_token_amount, user_ata, SwapBuilder};
use crate::chain_rpc::{ChainRpc, ConfirmationStatus};
use crate::constants;
use crate::error::{OutcomeStatus, RpcErrorKind, SkipReason};
use crate::event_sink::EventSink;
use crate::metrics::Metrics;
use crate::priority_fee::{tip_instruction, PriorityFeePolicy};
use crate::signing::SigningOracle;
use crate::types::{Direction, LatencyBreakdown, PlanPhase, PlanSizing, TradeOutcome, TradePlan};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub confirm_timeout: Duration,
    pub submit_retries: u32,
    pub fee_buffer_lamports: u64,
    pub mev_protection: bool,
    pub tip_lamports: u64,
    /// Run everything through simulation but never submit
    pub dry_run: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            confirm_timeout: constants::CONFIRM_TIMEOUT,
            submit_retries: constants::SUBMIT_RETRIES,
            fee_buffer_lamports: constants::FEE_BUFFER_LAMPORTS,
            mev_protection: false,
            tip_lamports: 100_000,
            dry_run: false,
        }
    }
}

pub struct Executor {
    rpc: Arc<dyn ChainRpc>,
    builder: Arc<SwapBuilder>,
    signer: Arc<dyn SigningOracle>,
    sink: Arc<dyn EventSink>,
    fee_policy: PriorityFeePolicy,
    blockhash_cache: BlockhashCache,
    metrics: Metrics,
    config: ExecutorConfig,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        builder: Arc<SwapBuilder>,
        signer: Arc<dyn SigningOracle>,
        sink: Arc<dyn EventSink>,
        fee_policy: PriorityFeePolicy,
        metrics: Metrics,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            rpc,
            builder,
            signer,
            sink,
            fee_policy,
            blockhash_cache: BlockhashCache::new(),
            metrics,
            config,
        }
    }

    /// Drive one plan to its terminal outcome and publish it.
    pub async fn execute(&self, plan: TradePlan) -> TradeOutcome {
        self.metrics.inflight_plans.inc();
        let started = Instant::now();
        let outcome = self.run(&plan, started).await;
        self.metrics.inflight_plans.dec();
        self.metrics.record_outcome(&outcome.status_label);

        if outcome.status == OutcomeStatus::Landed {
            // The pool's reserves just moved under us
            if let Some(pool) = plan.intent.pool_descriptor.pool_address() {
                self.builder
                    .cache()
                    .invalidate(&(plan.intent.protocol, pool));
            }
        }
        if let Err(e) = self.sink.publish(&outcome).await {
            warn!("event sink publish failed for {}: {}", outcome.plan_id, e);
        }
        info!(
            "plan {} follower {} -> {}",
            outcome.plan_id, outcome.follower_id, outcome.status_label
        );
        outcome
    }

    async fn run(&self, plan: &TradePlan, started: Instant) -> TradeOutcome {
        let mut latency = LatencyBreakdown::default();
        latency.queue_ms = plan
            .intent
            .observed_at
            .elapsed()
            .as_millis()
            .saturating_sub(started.elapsed().as_millis()) as u64;

        // Deadline gate before any work
        if plan.deadline_expired() {
            return TradeOutcome::new(plan, OutcomeStatus::Skipped(SkipReason::DeadlineExpired))
                .with_latency(finish(latency, started));
        }

        // ---- Building ------------------------------------------------------
        self.trace_phase(plan, PlanPhase::Building);
        let build_start = Instant::now();

        let amount_in = match self.resolve_amount(plan).await {
            Ok(amount) => amount,
            Err(reason) => {
                return TradeOutcome::new(plan, OutcomeStatus::Skipped(reason))
                    .with_latency(finish(latency, started));
            }
        };

        let built = match self.build_with_retry(plan, amount_in).await {
            Ok(built) => built,
            Err(e) => {
                return TradeOutcome::new(plan, OutcomeStatus::Skipped(e.skip_reason()))
                    .with_error(e.to_string())
                    .with_latency(finish(latency, started));
            }
        };
        latency.build_ms = build_start.elapsed().as_millis() as u64;

        if plan.deadline_expired() {
            return TradeOutcome::new(plan, OutcomeStatus::Skipped(SkipReason::DeadlineExpired))
                .with_latency(finish(latency, started));
        }

        // ---- Assembled -----------------------------------------------------
        self.trace_phase(plan, PlanPhase::Assembled);
        let assemble_start = Instant::now();
        let (blockhash, _) = match self
            .blockhash_cache
            .get(&self.rpc, &plan.intent.master_wallet)
            .await
        {
            Ok(pair) => pair,
            Err(e) => {
                return TradeOutcome::new(plan, OutcomeStatus::Skipped(SkipReason::PoolUnavailable))
                    .with_error(e.to_string())
                    .with_latency(finish(latency, started));
            }
        };

        let probe = match self.assemble(plan, &built.instructions, blockhash, None) {
            Ok(tx) => tx,
            Err(e) => {
                return TradeOutcome::new(plan, OutcomeStatus::Skipped(SkipReason::Unclonable))
                    .with_error(e)
                    .with_latency(finish(latency, started));
            }
        };
        latency.assemble_ms = assemble_start.elapsed().as_millis() as u64;

        // ---- Simulated -----------------------------------------------------
        let mut compute_units: Option<u64> = None;
        #[cfg(not(feature = "skip-simulation"))]
        {
            self.trace_phase(plan, PlanPhase::Simulated);
            let simulate_start = Instant::now();
            match self.rpc.simulate_transaction(&probe).await {
                Ok(sim) => {
                    if let Some(err) = &sim.err {
                        let tail = sim.log_tail(constants::SIMULATION_LOG_TAIL);
                        latency.simulate_ms = simulate_start.elapsed().as_millis() as u64;
                        return TradeOutcome::new(plan, OutcomeStatus::SimulatedReject)
                            .with_error(format!("{}\n{}", err, tail))
                            .with_latency(finish(latency, started));
                    }
                    compute_units = sim.units_consumed;
                }
                Err(e) => {
                    // Simulation infrastructure failure, not a program verdict
                    warn!("simulation unavailable for {}: {}", plan.plan_id, e);
                }
            }
            latency.simulate_ms = simulate_start.elapsed().as_millis() as u64;
        }
        #[cfg(feature = "skip-simulation")]
        {
            let _ = &probe;
        }

        if self.config.dry_run {
            debug!("dry-run: not submitting plan {}", plan.plan_id);
            return TradeOutcome::new(plan, OutcomeStatus::SimulatedOnly)
                .with_latency(finish(latency, started));
        }

        // ---- Submitted -----------------------------------------------------
        self.trace_phase(plan, PlanPhase::Submitted);
        let submit_start = Instant::now();
        let signature = match self
            .sign_and_submit(plan, &built.instructions, blockhash, compute_units)
            .await
        {
            Ok(signature) => signature,
            Err(outcome) => {
                return outcome.with_latency(finish(latency, started));
            }
        };
        latency.submit_ms = submit_start.elapsed().as_millis() as u64;

        // ---- Confirmation --------------------------------------------------
        let confirm_start = Instant::now();
        let status = self
            .rpc
            .confirm_signature(&signature, self.config.confirm_timeout)
            .await;
        latency.confirm_ms = confirm_start.elapsed().as_millis() as u64;
        self.fee_policy
            .observe_confirm_latency(confirm_start.elapsed());

        let outcome = match status {
            Ok(ConfirmationStatus::Confirmed) => {
                TradeOutcome::new(plan, OutcomeStatus::Landed).with_signature(signature)
            }
            Ok(ConfirmationStatus::Failed(err)) => {
                TradeOutcome::new(plan, OutcomeStatus::SubmittedFailed)
                    .with_signature(signature)
                    .with_error(err)
            }
            Ok(ConfirmationStatus::TimedOut) => {
                // May still land later; the sink consumer reconciles
                TradeOutcome::new(plan, OutcomeStatus::TimedOut).with_signature(signature)
            }
            Err(e) => TradeOutcome::new(plan, OutcomeStatus::TimedOut)
                .with_signature(signature)
                .with_error(e.to_string()),
        };
        outcome.with_latency(finish(latency, started))
    }

    /// Follower-denominated input amount; never derived from the master's.
    async fn resolve_amount(&self, plan: &TradePlan) -> Result<u64, SkipReason> {
        match plan.sizing {
            PlanSizing::BuyExactIn { amount } => {
                if amount == 0 {
                    return Err(SkipReason::NoFunds);
                }
                // The wallet must carry the input plus fee headroom
                let lamports = self.wallet_lamports(&plan.follower_pubkey).await;
                let needed = match plan.intent.direction {
                    Direction::Buy => amount.saturating_add(self.config.fee_buffer_lamports),
                    Direction::Sell => self.config.fee_buffer_lamports,
                };
                if lamports < needed {
                    return Err(SkipReason::NoFunds);
                }
                Ok(amount)
            }
            PlanSizing::SellFraction { fraction_bps } => {
                let holding = self.holding_of(plan, &plan.intent.input_mint).await;
                let amount =
                    ((holding as u128 * fraction_bps as u128) / 10_000u128) as u64;
                if amount == 0 {
                    return Err(SkipReason::NoPosition);
                }
                Ok(amount)
            }
        }
    }

    async fn wallet_lamports(&self, wallet: &Pubkey) -> u64 {
        match self
            .rpc
            .get_account_infos(
                std::slice::from_ref(wallet),
                solana_sdk::commitment_config::CommitmentConfig::confirmed(),
            )
            .await
        {
            Ok(accounts) => accounts
                .into_iter()
                .next()
                .flatten()
                .map(|a| a.lamports)
                .unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Live holding of `mint` in the follower's associated token account
    async fn holding_of(&self, plan: &TradePlan, mint: &Pubkey) -> u64 {
        let ata = user_ata(&plan.follower_pubkey, mint);
        match self
            .rpc
            .get_account_infos(
                &[ata],
                solana_sdk::commitment_config::CommitmentConfig::confirmed(),
            )
            .await
        {
            Ok(accounts) => accounts
                .into_iter()
                .next()
                .flatten()
                .and_then(|a| parse_token_amount(&a.data).ok())
                .unwrap_or(0),
            Err(_) => 0,
        }
    }

    async fn build_with_retry(
        &self,
        plan: &TradePlan,
        amount_in: u64,
    ) -> Result<crate::builder::BuiltSwap, crate::error::BuildError> {
        match self
            .builder
            .build(&plan.intent, &plan.follower_pubkey, amount_in, plan.slippage_bps)
            .await
        {
            Ok(built) => Ok(built),
            Err(e) if e.is_retryable() => {
                if let Some(pool) = plan.intent.pool_descriptor.pool_address() {
                    self.builder
                        .cache()
                        .invalidate(&(plan.intent.protocol, pool));
                }
                debug!("retrying build for {} after: {}", plan.plan_id, e);
                self.builder
                    .build(&plan.intent, &plan.follower_pubkey, amount_in, plan.slippage_bps)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Compute budget, priority fee, optional tip, then the swap body.
    fn assemble(
        &self,
        plan: &TradePlan,
        body: &[Instruction],
        blockhash: Hash,
        simulated_units: Option<u64>,
    ) -> Result<VersionedTransaction, String> {
        let unit_limit = match simulated_units {
            Some(units) => ((units as f64 * constants::COMPUTE_UNIT_HEADROOM) as u32)
                .max(constants::COMPUTE_UNIT_FLOOR)
                .min(constants::MAX_COMPUTE_UNITS),
            None => constants::MAX_COMPUTE_UNITS,
        };

        let mut instructions = vec![
            ComputeBudgetInstruction::set_compute_unit_limit(unit_limit),
            ComputeBudgetInstruction::set_compute_unit_price(self.fee_policy.compute_unit_price()),
        ];
        if self.config.mev_protection {
            instructions.push(tip_instruction(&plan.follower_pubkey, self.config.tip_lamports));
        }
        instructions.extend_from_slice(body);

        let message = v0::Message::try_compile(
            &plan.follower_pubkey,
            &instructions,
            &[],
            blockhash,
        )
        .map_err(|e| format!("message compile failed: {}", e))?;
        Ok(VersionedTransaction {
            signatures: vec![Signature::default()],
            message: VersionedMessage::V0(message),
        })
    }

    /// Sign through the oracle and submit with bounded retries.
    ///
    /// Transient failures (blockhash expiry, 5xx) retry with a fresh
    /// blockhash, which means a fresh signature. Signatures that already
    /// went over the wire are recorded per plan and never signed or sent
    /// again: the earlier attempt may have landed.
    async fn sign_and_submit(
        &self,
        plan: &TradePlan,
        body: &[Instruction],
        mut blockhash: Hash,
        simulated_units: Option<u64>,
    ) -> Result<Signature, TradeOutcome> {
        let mut submitted: HashSet<Signature> = HashSet::new();
        let mut attempt = 0u32;
        loop {
            let mut tx = self
                .assemble(plan, body, blockhash, simulated_units)
                .map_err(|e| {
                    TradeOutcome::new(plan, OutcomeStatus::Skipped(SkipReason::Unclonable))
                        .with_error(e)
                })?;
            let message_bytes = tx.message.serialize();
            let signature = match self.signer.sign(&plan.key_handle, &message_bytes).await {
                Ok(signature) => signature,
                Err(e) => {
                    return Err(
                        TradeOutcome::new(plan, OutcomeStatus::Skipped(SkipReason::Signer))
                            .with_error(e.to_string()),
                    );
                }
            };
            if !submitted.insert(signature) {
                // Identical message re-signed to the same bytes; the first
                // copy is already in flight
                return Ok(signature);
            }
            tx.signatures = vec![signature];

            match self.rpc.send_transaction(&tx).await {
                Ok(submitted_signature) => {
                    return Ok(submitted_signature);
                }
                Err(e) if e.kind == RpcErrorKind::Transient && attempt < self.config.submit_retries => {
                    attempt += 1;
                    match self
                        .blockhash_cache
                        .refresh(&self.rpc, &plan.intent.master_wallet)
                        .await
                    {
                        Ok((fresh, _)) => blockhash = fresh,
                        Err(refresh_err) => {
                            return Err(TradeOutcome::new(plan, OutcomeStatus::SubmittedFailed)
                                .with_error(refresh_err.to_string()));
                        }
                    }
                    warn!(
                        "submit retry {}/{} for {}: {}",
                        attempt, self.config.submit_retries, plan.plan_id, e
                    );
                }
                Err(e) => {
                    return Err(TradeOutcome::new(plan, OutcomeStatus::SubmittedFailed)
                        .with_error(e.to_string()));
                }
            }
        }
    }

    fn trace_phase(&self, plan: &TradePlan, phase: PlanPhase) {
        debug!("plan {} -> {:?}", plan.plan_id, phase);
    }
}

fn finish(mut latency: LatencyBreakdown, started: Instant) -> LatencyBreakdown {
    latency.total_ms = started.elapsed().as_millis() as u64;
    latency
}
