//! Stream ingress: dedup, freshness and reconnect in front of the analyzer
//!
//! Consumes the stream source's at-least-once delivery and hands an
//! at-most-once, fresh-only stream downstream through a bounded channel
//! (backpressure). Source failures never propagate; they flip the ingress
//! into a reconnect loop with jittered exponential backoff.

use lru::LruCache;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::constants;
use crate::metrics::Metrics;
use crate::stream_source::StreamSource;
use crate::types::RawTransaction;

#[derive(Debug, Clone)]
pub struct IngressConfig {
    pub dedup_capacity: usize,
    pub freshness_horizon: Duration,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    pub backoff_jitter: f64,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            dedup_capacity: constants::SIGNATURE_DEDUP_CAPACITY,
            freshness_horizon: constants::FRESHNESS_HORIZON,
            backoff_min: constants::RECONNECT_BACKOFF_MIN,
            backoff_max: constants::RECONNECT_BACKOFF_MAX,
            backoff_jitter: constants::RECONNECT_JITTER,
        }
    }
}

/// Membership mutations accepted at any time; during a reconnect they are
/// applied before the next subscribe, never lost.
#[derive(Debug)]
enum IngressCommand {
    Subscribe(Vec<Pubkey>),
    Unsubscribe(Pubkey),
    ReplaceSet(Vec<Pubkey>),
    Shutdown,
}

#[derive(Clone)]
pub struct IngressHandle {
    tx: mpsc::UnboundedSender<IngressCommand>,
}

impl IngressHandle {
    pub fn subscribe(&self, masters: Vec<Pubkey>) {
        let _ = self.tx.send(IngressCommand::Subscribe(masters));
    }

    pub fn unsubscribe(&self, master: Pubkey) {
        let _ = self.tx.send(IngressCommand::Unsubscribe(master));
    }

    /// Swap the full watched set, used on config snapshot refresh
    pub fn replace_set(&self, masters: Vec<Pubkey>) {
        let _ = self.tx.send(IngressCommand::ReplaceSet(masters));
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(IngressCommand::Shutdown);
    }
}

/// Spawn the ingress task. Returns the control handle and the deduplicated
/// downstream transaction channel.
pub fn spawn_stream_ingress(
    source: Arc<dyn StreamSource>,
    metrics: Metrics,
    config: IngressConfig,
) -> (IngressHandle, mpsc::Receiver<RawTransaction>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::channel(1024);
    tokio::spawn(run_ingress(source, metrics, config, cmd_rx, out_tx));
    (IngressHandle { tx: cmd_tx }, out_rx)
}

async fn run_ingress(
    source: Arc<dyn StreamSource>,
    metrics: Metrics,
    config: IngressConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<IngressCommand>,
    out_tx: mpsc::Sender<RawTransaction>,
) {
    let mut masters: HashSet<Pubkey> = HashSet::new();
    let mut seen: LruCache<solana_sdk::signature::Signature, ()> = LruCache::new(
        NonZeroUsize::new(config.dedup_capacity.max(1)).expect("nonzero dedup capacity"),
    );
    let mut backoff = config.backoff_min;

    'reconnect: loop {
        // Idle until at least one master is watched
        while masters.is_empty() {
            match cmd_rx.recv().await {
                Some(cmd) => {
                    if apply_command(&mut masters, cmd, &metrics) {
                        return;
                    }
                }
                None => return,
            }
        }

        let watched: Vec<Pubkey> = masters.iter().copied().collect();
        let mut delivery = match source.connect(&watched).await {
            Ok(rx) => {
                info!("stream connected, watching {} masters", watched.len());
                backoff = config.backoff_min;
                rx
            }
            Err(e) => {
                metrics.stream_degraded.inc();
                warn!("stream connect failed: {}; retrying in {:?}", e, backoff);
                let delay = jittered(backoff, config.backoff_jitter);
                backoff = (backoff * 2).min(config.backoff_max);
                // Keep absorbing membership changes while waiting
                let sleep = tokio::time::sleep(delay);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        _ = &mut sleep => break,
                        cmd = cmd_rx.recv() => match cmd {
                            Some(cmd) => {
                                if apply_command(&mut masters, cmd, &metrics) {
                                    return;
                                }
                            }
                            None => return,
                        },
                    }
                }
                continue 'reconnect;
            }
        };

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let before = masters.clone();
                    match cmd {
                        Some(cmd) => {
                            if apply_command(&mut masters, cmd, &metrics) {
                                return;
                            }
                        }
                        None => return,
                    }
                    // Membership changed: resubscribe with the new set
                    if masters != before {
                        debug!("master set changed, resubscribing");
                        continue 'reconnect;
                    }
                }
                raw = delivery.recv() => {
                    match raw {
                        Some(raw) => {
                            metrics.transactions_seen.inc();
                            if seen.put(raw.signature, ()).is_some() {
                                metrics.duplicates_dropped.inc();
                                debug!("duplicate signature {} dropped", raw.signature);
                                continue;
                            }
                            if raw.received_at.elapsed() > config.freshness_horizon {
                                metrics.stale_dropped.inc();
                                debug!("stale transaction {} dropped", raw.signature);
                                continue;
                            }
                            if out_tx.send(raw).await.is_err() {
                                // Downstream gone; nothing left to do
                                return;
                            }
                        }
                        None => {
                            metrics.stream_degraded.inc();
                            warn!("stream closed; reconnecting");
                            continue 'reconnect;
                        }
                    }
                }
            }
        }
    }
}

/// Returns true on shutdown
fn apply_command(masters: &mut HashSet<Pubkey>, cmd: IngressCommand, metrics: &Metrics) -> bool {
    match cmd {
        IngressCommand::Subscribe(new) => {
            for master in new {
                masters.insert(master);
            }
        }
        IngressCommand::Unsubscribe(master) => {
            masters.remove(&master);
        }
        IngressCommand::ReplaceSet(new) => {
            *masters = new.into_iter().collect();
        }
        IngressCommand::Shutdown => return true,
    }
    metrics.watched_masters.set(masters.len() as i64);
    false
}

fn jittered(delay: Duration, jitter: f64) -> Duration {
    let factor = 1.0 + (fastrand::f64() * 2.0 - 1.0) * jitter;
    delay.mul_f64(factor.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use solana_sdk::message::VersionedMessage;
    use solana_sdk::signature::Signature;
    use solana_sdk::transaction::VersionedTransaction;
    use std::collections::VecDeque;
    use std::time::Instant;

    use crate::types::TransactionMeta;

    fn raw_tx(signature: Signature) -> RawTransaction {
        RawTransaction {
            signature,
            slot: 1,
            block_time: None,
            transaction: VersionedTransaction {
                signatures: vec![],
                message: VersionedMessage::Legacy(solana_sdk::message::Message::default()),
            },
            meta: TransactionMeta::default(),
            received_at: Instant::now(),
        }
    }

    /// Source whose every `connect` hands out the next scripted batch
    struct ScriptedSource {
        batches: Mutex<VecDeque<Vec<RawTransaction>>>,
        connects: Mutex<usize>,
    }

    impl ScriptedSource {
        fn new(batches: Vec<Vec<RawTransaction>>) -> Self {
            Self {
                batches: Mutex::new(batches.into()),
                connects: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl StreamSource for ScriptedSource {
        async fn connect(&self, _masters: &[Pubkey]) -> Result<mpsc::Receiver<RawTransaction>> {
            *self.connects.lock() += 1;
            let batch = self.batches.lock().pop_front().unwrap_or_default();
            let (tx, rx) = mpsc::channel(64);
            tokio::spawn(async move {
                for raw in batch {
                    if tx.send(raw).await.is_err() {
                        return;
                    }
                }
                // Hold the sender open briefly so the test can drain
                tokio::time::sleep(Duration::from_millis(200)).await;
            });
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn test_duplicate_signatures_pass_once() {
        let signature = Signature::new_unique();
        let source = Arc::new(ScriptedSource::new(vec![vec![
            raw_tx(signature),
            raw_tx(signature),
            raw_tx(Signature::new_unique()),
        ]]));
        let metrics = Metrics::new().unwrap();
        let (handle, mut rx) =
            spawn_stream_ingress(source, metrics.clone(), IngressConfig::default());
        handle.subscribe(vec![Pubkey::new_unique()]);

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.signature, signature);
        assert_ne!(second.signature, signature);
        assert_eq!(metrics.duplicates_dropped.get(), 1);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_reconnects_after_source_closes() {
        let sig_a = Signature::new_unique();
        let sig_b = Signature::new_unique();
        let source = Arc::new(ScriptedSource::new(vec![
            vec![raw_tx(sig_a)],
            vec![raw_tx(sig_b)],
        ]));
        let metrics = Metrics::new().unwrap();
        let mut config = IngressConfig::default();
        config.backoff_min = Duration::from_millis(1);
        let (handle, mut rx) = spawn_stream_ingress(source.clone(), metrics.clone(), config);
        handle.subscribe(vec![Pubkey::new_unique()]);

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.signature, sig_a);
        assert_eq!(second.signature, sig_b);
        assert!(*source.connects.lock() >= 2);
        assert!(metrics.stream_degraded.get() >= 1);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_stale_transactions_are_dropped() {
        let mut stale = raw_tx(Signature::new_unique());
        stale.received_at = Instant::now() - Duration::from_secs(60);
        let fresh = raw_tx(Signature::new_unique());
        let fresh_sig = fresh.signature;
        let source = Arc::new(ScriptedSource::new(vec![vec![stale, fresh]]));
        let metrics = Metrics::new().unwrap();
        let (handle, mut rx) =
            spawn_stream_ingress(source, metrics.clone(), IngressConfig::default());
        handle.subscribe(vec![Pubkey::new_unique()]);

        let delivered = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.signature, fresh_sig);
        assert_eq!(metrics.stale_dropped.get(), 1);
        handle.shutdown();
    }
}
