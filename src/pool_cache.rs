//! Pool state cache: single-flight, TTL, LRU
//!
//! Keyed by `(protocol, pool address)`. Concurrent callers for the same key
//! join the one in-flight fetch and receive the same result. Entries are
//! invalidated on fetch failure, on an observed swap through the pool, and
//! by the TTL sweeper. Dynamic state uses a short TTL; static layout is only
//! refreshed on an explicit miss.

use lru::LruCache;
use parking_lot::Mutex;
use solana_sdk::pubkey::Pubkey;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::bonding_curve_state::BondingCurveState;
use crate::clmm_state::ClmmPoolBundle;
use crate::constants;
use crate::cp_amm_state::CpAmmPoolState;
use crate::cpmm_state::CpmmPoolState;
use crate::damm_v2_state::DammV2PoolState;
use crate::dbc_state::DbcPoolState;
use crate::dlmm_state::DlmmPairState;
use crate::error::BuildError;
use crate::launchpad_state::LaunchpadPoolState;
use crate::metrics::Metrics;
use crate::types::Protocol;

/// Decoded protocol-specific pool state held by one cache entry
#[derive(Debug, Clone, PartialEq)]
pub enum PoolState {
    BondingCurve(BondingCurveState),
    ConstantProduct(CpAmmPoolState),
    Concentrated(ClmmPoolBundle),
    ConstantProductV2(CpmmPoolState),
    Launchpad(LaunchpadPoolState),
    BinLiquidity(DlmmPairState),
    DynamicBonding(DbcPoolState),
    DynamicCp(DammV2PoolState),
}

pub type PoolKey = (Protocol, Pubkey);

#[derive(Debug)]
pub struct PoolCacheEntry {
    pub state: PoolState,
    pub fetched_at: Instant,
}

type Flight = Arc<OnceCell<Result<Arc<PoolCacheEntry>, BuildError>>>;

pub struct PoolCache {
    slots: Mutex<LruCache<PoolKey, Flight>>,
    ttl: Duration,
    metrics: Metrics,
}

impl PoolCache {
    pub fn new(metrics: Metrics) -> Self {
        Self::with_settings(
            constants::POOL_CACHE_TTL,
            constants::POOL_CACHE_CAPACITY,
            metrics,
        )
    }

    pub fn with_settings(ttl: Duration, capacity: usize, metrics: Metrics) -> Self {
        Self {
            slots: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("nonzero capacity"),
            )),
            ttl,
            metrics,
        }
    }

    /// Fetch-through read with at most one concurrent fetch per key.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: PoolKey,
        fetcher: F,
    ) -> Result<Arc<PoolCacheEntry>, BuildError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PoolState, BuildError>>,
    {
        let flight = {
            let mut slots = self.slots.lock();
            match slots.get(&key) {
                Some(cell) => match cell.get() {
                    Some(Ok(entry)) if entry.fetched_at.elapsed() <= self.ttl => {
                        self.metrics.pool_cache_hits.inc();
                        return Ok(entry.clone());
                    }
                    Some(_) => {
                        // Stale value or a failed fetch: start a new flight
                        self.metrics.pool_cache_misses.inc();
                        let cell: Flight = Arc::new(OnceCell::new());
                        slots.put(key, cell.clone());
                        cell
                    }
                    None => {
                        self.metrics.pool_cache_joined_flights.inc();
                        cell.clone()
                    }
                },
                None => {
                    self.metrics.pool_cache_misses.inc();
                    let cell: Flight = Arc::new(OnceCell::new());
                    slots.put(key, cell.clone());
                    cell
                }
            }
        };

        let result = flight
            .get_or_init(|| async {
                fetcher().await.map(|state| {
                    Arc::new(PoolCacheEntry {
                        state,
                        fetched_at: Instant::now(),
                    })
                })
            })
            .await
            .clone();

        if result.is_err() {
            // Failed fetches do not stay resident
            let mut slots = self.slots.lock();
            if let Some(current) = slots.peek(&key) {
                if Arc::ptr_eq(current, &flight) {
                    slots.pop(&key);
                }
            }
        }
        result
    }

    /// Drop a key, e.g. after landing a swap through that pool
    pub fn invalidate(&self, key: &PoolKey) {
        if self.slots.lock().pop(key).is_some() {
            self.metrics.pool_cache_invalidations.inc();
            debug!("pool cache invalidated {:?}/{}", key.0, key.1);
        }
    }

    /// Remove entries whose TTL has lapsed; called by the sweeper task
    pub fn sweep_expired(&self) -> usize {
        let mut slots = self.slots.lock();
        let expired: Vec<PoolKey> = slots
            .iter()
            .filter_map(|(key, cell)| match cell.get() {
                Some(Ok(entry)) if entry.fetched_at.elapsed() > self.ttl => Some(*key),
                _ => None,
            })
            .collect();
        let count = expired.len();
        for key in expired {
            slots.pop(&key);
            self.metrics.pool_cache_invalidations.inc();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Periodic TTL sweep; one per cache instance
pub fn spawn_ttl_sweeper(cache: Arc<PoolCache>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let swept = cache.sweep_expired();
            if swept > 0 {
                debug!("pool cache sweeper removed {} expired entries", swept);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bonding_curve_state::synthetic_curve_data;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_state() -> PoolState {
        let mint = Pubkey::new_unique();
        let creator = Pubkey::new_unique();
        let data = synthetic_curve_data(1_000, 2_000, 500, 100, &creator);
        PoolState::BondingCurve(BondingCurveState::parse(&mint, &data).unwrap())
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let cache = Arc::new(PoolCache::with_settings(
            Duration::from_secs(60),
            128,
            Metrics::new().unwrap(),
        ));
        let key = (Protocol::BondingCurve, Pubkey::new_unique());
        let fetches = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..100 {
            let cache = cache.clone();
            let fetches = fetches.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(key, || async move {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(sample_state())
                    })
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entries_refetch() {
        let cache = PoolCache::with_settings(Duration::from_millis(10), 128, Metrics::new().unwrap());
        let key = (Protocol::BondingCurve, Pubkey::new_unique());
        let fetches = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let fetches = fetches.clone();
            cache
                .get_or_fetch(key, || async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(sample_state())
                })
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let cache = PoolCache::with_settings(Duration::from_secs(60), 128, Metrics::new().unwrap());
        let key = (Protocol::BondingCurve, Pubkey::new_unique());

        let err = cache
            .get_or_fetch(key, || async {
                Err(BuildError::PoolStateUnavailable("gone".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::PoolStateUnavailable(_)));
        assert!(cache.is_empty());

        // Next caller gets a fresh fetch
        let entry = cache
            .get_or_fetch(key, || async { Ok(sample_state()) })
            .await
            .unwrap();
        assert!(matches!(entry.state, PoolState::BondingCurve(_)));
    }

    #[tokio::test]
    async fn test_invalidate_and_sweep() {
        let cache = PoolCache::with_settings(Duration::from_millis(5), 128, Metrics::new().unwrap());
        let key_a = (Protocol::BondingCurve, Pubkey::new_unique());
        let key_b = (Protocol::ConstantProductAmm, Pubkey::new_unique());
        cache
            .get_or_fetch(key_a, || async { Ok(sample_state()) })
            .await
            .unwrap();
        cache
            .get_or_fetch(key_b, || async { Ok(sample_state()) })
            .await
            .unwrap();
        assert_eq!(cache.len(), 2);

        cache.invalidate(&key_a);
        assert_eq!(cache.len(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.sweep_expired(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_lru_eviction_respects_capacity() {
        let cache = PoolCache::with_settings(Duration::from_secs(60), 2, Metrics::new().unwrap());
        for _ in 0..5 {
            let key = (Protocol::BondingCurve, Pubkey::new_unique());
            cache
                .get_or_fetch(key, || async { Ok(sample_state()) })
                .await
                .unwrap();
        }
        assert_eq!(cache.len(), 2);
    }
}
