//! Coordinator: joins the intent stream to the follower set
//!
//! One task consumes analyzed transactions in source order per master,
//! projects each intent into one plan per matching follower, enforces
//! (master signature, follower) idempotency, and feeds bounded per-follower
//! lanes. Lanes execute up to a fixed number of plans in parallel and drop
//! the oldest queued plan on overflow, with an outcome emitted for every
//! plan that ever existed.

use lru::LruCache;
use parking_lot::Mutex;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analyzer::Analyzer;
use crate::chain_rpc::ChainRpc;
use crate::config_store::{ConfigSnapshot, ConfigStore, FollowerEntry};
use crate::constants;
use crate::error::{AnalyzeError, OutcomeStatus, SkipReason};
use crate::event_sink::EventSink;
use crate::executor::Executor;
use crate::metrics::Metrics;
use crate::signing::SigningOracle;
use crate::stream_ingress::IngressHandle;
use crate::types::{
    Direction, FollowerId, PlanSizing, RawTransaction, SwapIntent, TradeOutcome, TradePlan,
};

/// Operator control verbs; `drain` finishes in-flight plans and exits
#[derive(Debug)]
pub enum ControlCommand {
    Pause,
    Resume,
    ReloadConfig,
    Drain,
    SnapshotMetrics(oneshot::Sender<String>),
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub per_follower_concurrency: usize,
    pub queue_capacity: usize,
    pub plan_deadline: Duration,
    pub idempotency_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            per_follower_concurrency: constants::PER_FOLLOWER_CONCURRENCY,
            queue_capacity: constants::FOLLOWER_QUEUE_CAPACITY,
            plan_deadline: constants::PLAN_DEADLINE,
            idempotency_capacity: constants::IDEMPOTENCY_CAPACITY,
        }
    }
}

/// Bounded FIFO lane feeding one follower's executor workers
struct Lane {
    queue: Arc<Mutex<VecDeque<TradePlan>>>,
    notify: Arc<Notify>,
    capacity: usize,
}

impl Lane {
    fn spawn(executor: Arc<Executor>, concurrency: usize, capacity: usize) -> Self {
        let queue: Arc<Mutex<VecDeque<TradePlan>>> = Arc::new(Mutex::new(VecDeque::new()));
        let notify = Arc::new(Notify::new());
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

        {
            let queue = queue.clone();
            let notify = notify.clone();
            tokio::spawn(async move {
                loop {
                    let plan = loop {
                        if let Some(plan) = queue.lock().pop_front() {
                            break plan;
                        }
                        notify.notified().await;
                    };
                    // Plans enter execution in arrival order; completions
                    // are network-bound and unordered
                    let permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .expect("lane semaphore never closes");
                    let executor = executor.clone();
                    tokio::spawn(async move {
                        executor.execute(plan).await;
                        drop(permit);
                    });
                }
            });
        }
        Self {
            queue,
            notify,
            capacity,
        }
    }

    /// Enqueue, returning the plan dropped to make room, if any
    fn push(&self, plan: TradePlan) -> Option<TradePlan> {
        let mut queue = self.queue.lock();
        let dropped = if queue.len() >= self.capacity {
            queue.pop_front()
        } else {
            None
        };
        queue.push_back(plan);
        self.notify.notify_one();
        dropped
    }

    fn is_idle(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

pub struct Coordinator {
    analyzer: Analyzer,
    config_store: Arc<dyn ConfigStore>,
    signer: Arc<dyn SigningOracle>,
    executor: Arc<Executor>,
    sink: Arc<dyn EventSink>,
    rpc: Arc<dyn ChainRpc>,
    ingress: IngressHandle,
    metrics: Metrics,
    config: CoordinatorConfig,
    snapshot: ConfigSnapshot,
    idempotency: LruCache<(Signature, FollowerId), ()>,
    lanes: HashMap<FollowerId, Lane>,
    paused: bool,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        analyzer: Analyzer,
        config_store: Arc<dyn ConfigStore>,
        signer: Arc<dyn SigningOracle>,
        executor: Arc<Executor>,
        sink: Arc<dyn EventSink>,
        rpc: Arc<dyn ChainRpc>,
        ingress: IngressHandle,
        metrics: Metrics,
        config: CoordinatorConfig,
    ) -> anyhow::Result<Self> {
        let snapshot = config_store.list_active_followers().await?;
        ingress.replace_set(snapshot.master_set().into_iter().collect());
        let idempotency = LruCache::new(
            NonZeroUsize::new(config.idempotency_capacity.max(1)).expect("nonzero capacity"),
        );
        Ok(Self {
            analyzer,
            config_store,
            signer,
            executor,
            sink,
            rpc,
            ingress,
            metrics,
            config,
            snapshot,
            idempotency,
            lanes: HashMap::new(),
            paused: false,
        })
    }

    /// Main loop; returns cleanly on `drain` or when the intake closes.
    pub async fn run(
        mut self,
        mut transactions: mpsc::Receiver<RawTransaction>,
        mut control: mpsc::Receiver<ControlCommand>,
    ) {
        let mut changes = self.config_store.on_change();
        info!(
            "coordinator started with {} followers over {} masters",
            self.snapshot.len(),
            self.snapshot.master_set().len()
        );
        loop {
            tokio::select! {
                command = control.recv() => {
                    match command {
                        Some(ControlCommand::Pause) => {
                            info!("paused");
                            self.paused = true;
                        }
                        Some(ControlCommand::Resume) => {
                            info!("resumed");
                            self.paused = false;
                        }
                        Some(ControlCommand::ReloadConfig) => {
                            self.refresh_snapshot().await;
                        }
                        Some(ControlCommand::SnapshotMetrics(reply)) => {
                            let _ = reply.send(self.metrics.snapshot().unwrap_or_default());
                        }
                        Some(ControlCommand::Drain) | None => {
                            self.drain().await;
                            return;
                        }
                    }
                }
                _ = changes.recv() => {
                    self.refresh_snapshot().await;
                }
                raw = transactions.recv() => {
                    match raw {
                        Some(raw) => {
                            if !self.paused {
                                self.process(Arc::new(raw)).await;
                            }
                        }
                        None => {
                            self.drain().await;
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn refresh_snapshot(&mut self) {
        match self.config_store.list_active_followers().await {
            Ok(snapshot) => {
                self.snapshot = snapshot;
                self.ingress
                    .replace_set(self.snapshot.master_set().into_iter().collect());
                info!(
                    "config snapshot v{}: {} followers",
                    self.snapshot.version,
                    self.snapshot.len()
                );
            }
            Err(e) => warn!("config refresh failed, keeping snapshot: {}", e),
        }
    }

    async fn process(&mut self, raw: Arc<RawTransaction>) {
        let masters = self.snapshot.master_set();
        let intent = match self.analyzer.analyze(&raw, &masters) {
            Ok(Some(intent)) => intent,
            Ok(None) => return,
            Err(AnalyzeError::IncompleteAccounts) => {
                // One refetch: the node may simply not have served the
                // loaded addresses yet
                match self.rpc.get_transaction(&raw.signature).await {
                    Ok(Some(fresh)) => {
                        match self.analyzer.analyze(&Arc::new(fresh), &masters) {
                            Ok(Some(intent)) => intent,
                            Ok(None) => return,
                            Err(e) => {
                                self.metrics.analyze_failures.inc();
                                warn!("analyze retry failed for {}: {}", raw.signature, e);
                                return;
                            }
                        }
                    }
                    _ => {
                        self.metrics.analyze_failures.inc();
                        warn!("refetch failed for {}", raw.signature);
                        return;
                    }
                }
            }
            Err(e) => {
                self.metrics.analyze_failures.inc();
                warn!("analyze failed for {}: {}", raw.signature, e);
                return;
            }
        };

        let intent = Arc::new(intent);
        let followers = self.snapshot.followers_of(&intent.master_wallet);
        debug!(
            "intent {} ({}) fans out to {} followers",
            intent.master_signature,
            intent.protocol.name(),
            followers.len()
        );
        for follower in followers {
            self.dispatch(intent.clone(), follower).await;
        }
    }

    async fn dispatch(&mut self, intent: Arc<SwapIntent>, follower: Arc<FollowerEntry>) {
        let key = (intent.master_signature, follower.follower_id.clone());
        if self.idempotency.put(key, ()).is_some() {
            self.metrics.plans_deduplicated.inc();
            debug!(
                "duplicate ({}, {}) discarded",
                intent.master_signature, follower.follower_id
            );
            return;
        }

        let plan = match self.project_plan(&intent, &follower).await {
            Ok(plan) => plan,
            Err(outcome) => {
                self.metrics.record_outcome(&outcome.status_label);
                if let Err(e) = self.sink.publish(&outcome).await {
                    warn!("event sink publish failed: {}", e);
                }
                return;
            }
        };

        self.metrics.plans_created.inc();
        let lane = self.lane_for(&follower.follower_id);
        if let Some(dropped) = lane.push(plan) {
            self.metrics.queue_overflow_dropped.inc();
            let outcome =
                TradeOutcome::new(&dropped, OutcomeStatus::Skipped(SkipReason::QueueOverflow));
            self.metrics.record_outcome(&outcome.status_label);
            if let Err(e) = self.sink.publish(&outcome).await {
                warn!("event sink publish failed: {}", e);
            }
        }
    }

    /// Project one intent onto one follower. Buys are sized from the
    /// follower's configuration, capped at the per-trade maximum; sells
    /// defer to the executor's live-holding read.
    async fn project_plan(
        &self,
        intent: &Arc<SwapIntent>,
        follower: &Arc<FollowerEntry>,
    ) -> Result<TradePlan, TradeOutcome> {
        let sizing = match intent.direction {
            Direction::Buy => PlanSizing::BuyExactIn {
                amount: follower.input_size_raw.min(follower.max_per_trade_raw),
            },
            Direction::Sell => PlanSizing::SellFraction {
                fraction_bps: follower.sell_fraction_bps,
            },
        };
        let deadline = intent.observed_at + self.config.plan_deadline;

        let mut plan = TradePlan {
            plan_id: Uuid::new_v4(),
            follower_id: follower.follower_id.clone(),
            key_handle: follower.key_handle.clone(),
            follower_pubkey: Pubkey::default(),
            intent: intent.clone(),
            sizing,
            slippage_bps: follower.slippage_bps,
            deadline,
        };
        match self.signer.pubkey(&follower.key_handle).await {
            Ok(pubkey) => {
                plan.follower_pubkey = pubkey;
                Ok(plan)
            }
            Err(e) => Err(
                TradeOutcome::new(&plan, OutcomeStatus::Skipped(SkipReason::Signer))
                    .with_error(e.to_string()),
            ),
        }
    }

    fn lane_for(&mut self, follower_id: &FollowerId) -> &Lane {
        if !self.lanes.contains_key(follower_id) {
            let lane = Lane::spawn(
                self.executor.clone(),
                self.config.per_follower_concurrency,
                self.config.queue_capacity,
            );
            self.lanes.insert(follower_id.clone(), lane);
        }
        self.lanes.get(follower_id).expect("lane just inserted")
    }

    /// Finish in-flight plans, accept no new work.
    async fn drain(&mut self) {
        info!("draining: waiting for queues and in-flight plans");
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        loop {
            let queues_idle = self.lanes.values().all(|lane| lane.is_idle());
            let inflight = self.metrics.inflight_plans.get();
            if queues_idle && inflight == 0 {
                info!("drain complete");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("drain timed out with {} plans in flight", inflight);
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buy_sizing_caps_at_max_per_trade() {
        let follower = FollowerEntry {
            follower_id: "f1".into(),
            user_ref: "u".into(),
            key_handle: "k".into(),
            master_pubkey: Pubkey::new_unique(),
            input_size_raw: 900_000_000,
            slippage_bps: 100,
            max_per_trade_raw: 500_000_000,
            sell_fraction_bps: 10_000,
            enabled: true,
        };
        // Scaling never derives from the master's amount
        let amount = follower.input_size_raw.min(follower.max_per_trade_raw);
        assert_eq!(amount, 500_000_000);
    }

    #[test]
    fn test_config_defaults_match_published_numbers() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.per_follower_concurrency, 4);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.plan_deadline, Duration::from_secs(15));
    }
}
