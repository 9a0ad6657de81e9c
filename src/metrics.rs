//! Pipeline counters exported through a prometheus registry
//!
//! One `Metrics` value is built at startup and threaded into each component;
//! nothing registers against a global registry.

use anyhow::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub transactions_seen: IntCounter,
    pub duplicates_dropped: IntCounter,
    pub stale_dropped: IntCounter,
    pub stream_degraded: IntCounter,
    pub intents_extracted: IntCounter,
    pub analyze_failures: IntCounter,
    pub plans_created: IntCounter,
    pub plans_deduplicated: IntCounter,
    pub queue_overflow_dropped: IntCounter,
    pub outcomes: IntCounterVec,
    pub pool_cache_hits: IntCounter,
    pub pool_cache_misses: IntCounter,
    pub pool_cache_joined_flights: IntCounter,
    pub pool_cache_invalidations: IntCounter,
    pub watched_masters: IntGauge,
    pub inflight_plans: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let transactions_seen =
            IntCounter::with_opts(Opts::new("transactions_seen", "Raw transactions received"))?;
        let duplicates_dropped = IntCounter::with_opts(Opts::new(
            "duplicates_dropped",
            "Transactions dropped by the signature dedup window",
        ))?;
        let stale_dropped = IntCounter::with_opts(Opts::new(
            "stale_dropped",
            "Transactions older than the freshness horizon on arrival",
        ))?;
        let stream_degraded = IntCounter::with_opts(Opts::new(
            "stream_degraded",
            "Stream source disconnects that entered the reconnect loop",
        ))?;
        let intents_extracted = IntCounter::with_opts(Opts::new(
            "intents_extracted",
            "Swap intents recognized by the analyzer",
        ))?;
        let analyze_failures = IntCounter::with_opts(Opts::new(
            "analyze_failures",
            "Unrecoverable per-transaction decode failures",
        ))?;
        let plans_created =
            IntCounter::with_opts(Opts::new("plans_created", "Trade plans fanned out"))?;
        let plans_deduplicated = IntCounter::with_opts(Opts::new(
            "plans_deduplicated",
            "Plans suppressed by (master signature, follower) idempotency",
        ))?;
        let queue_overflow_dropped = IntCounter::with_opts(Opts::new(
            "queue_overflow_dropped",
            "Oldest plans dropped from a full follower queue",
        ))?;
        let outcomes = IntCounterVec::new(
            Opts::new("outcomes", "Terminal trade outcomes by status"),
            &["status"],
        )?;
        let pool_cache_hits =
            IntCounter::with_opts(Opts::new("pool_cache_hits", "Pool cache hits"))?;
        let pool_cache_misses =
            IntCounter::with_opts(Opts::new("pool_cache_misses", "Pool cache misses"))?;
        let pool_cache_joined_flights = IntCounter::with_opts(Opts::new(
            "pool_cache_joined_flights",
            "Callers that joined an in-flight pool fetch",
        ))?;
        let pool_cache_invalidations = IntCounter::with_opts(Opts::new(
            "pool_cache_invalidations",
            "Explicit pool cache invalidations",
        ))?;
        let watched_masters =
            IntGauge::with_opts(Opts::new("watched_masters", "Masters currently subscribed"))?;
        let inflight_plans =
            IntGauge::with_opts(Opts::new("inflight_plans", "Plans currently executing"))?;

        registry.register(Box::new(transactions_seen.clone()))?;
        registry.register(Box::new(duplicates_dropped.clone()))?;
        registry.register(Box::new(stale_dropped.clone()))?;
        registry.register(Box::new(stream_degraded.clone()))?;
        registry.register(Box::new(intents_extracted.clone()))?;
        registry.register(Box::new(analyze_failures.clone()))?;
        registry.register(Box::new(plans_created.clone()))?;
        registry.register(Box::new(plans_deduplicated.clone()))?;
        registry.register(Box::new(queue_overflow_dropped.clone()))?;
        registry.register(Box::new(outcomes.clone()))?;
        registry.register(Box::new(pool_cache_hits.clone()))?;
        registry.register(Box::new(pool_cache_misses.clone()))?;
        registry.register(Box::new(pool_cache_joined_flights.clone()))?;
        registry.register(Box::new(pool_cache_invalidations.clone()))?;
        registry.register(Box::new(watched_masters.clone()))?;
        registry.register(Box::new(inflight_plans.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            transactions_seen,
            duplicates_dropped,
            stale_dropped,
            stream_degraded,
            intents_extracted,
            analyze_failures,
            plans_created,
            plans_deduplicated,
            queue_overflow_dropped,
            outcomes,
            pool_cache_hits,
            pool_cache_misses,
            pool_cache_joined_flights,
            pool_cache_invalidations,
            watched_masters,
            inflight_plans,
        })
    }

    pub fn record_outcome(&self, status_label: &str) {
        self.outcomes.with_label_values(&[status_label]).inc();
    }

    /// Text exposition for the `snapshot-metrics` control verb
    pub fn snapshot(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_register_and_snapshot() {
        let metrics = Metrics::new().unwrap();
        metrics.transactions_seen.inc();
        metrics.duplicates_dropped.inc();
        metrics.record_outcome("landed");
        metrics.record_outcome("landed");

        let text = metrics.snapshot().unwrap();
        assert!(text.contains("transactions_seen 1"));
        assert!(text.contains("duplicates_dropped 1"));
        assert!(text.contains("landed"));
    }
}
