//! Config store interface: the read-only view of (follower, master) pairs
//!
//! The coordinator takes an immutable snapshot per intent and refreshes it
//! when the store signals a change. Creation and retirement of followers is
//! an operator concern outside the core.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::types::FollowerId;

/// One active (follower, master) subscription
#[derive(Debug, Clone, PartialEq)]
pub struct FollowerEntry {
    pub follower_id: FollowerId,
    pub user_ref: String,
    pub key_handle: String,
    pub master_pubkey: Pubkey,
    /// Raw quote units spent on a buy
    pub input_size_raw: u64,
    pub slippage_bps: u16,
    /// Per-trade cap in raw quote units
    pub max_per_trade_raw: u64,
    /// Fraction of the live holding sold when mirroring a sell
    pub sell_fraction_bps: u16,
    pub enabled: bool,
}

/// Immutable follower set used for one intent's fan-out
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    pub version: u64,
    followers: Vec<Arc<FollowerEntry>>,
}

impl ConfigSnapshot {
    pub fn new(version: u64, followers: Vec<FollowerEntry>) -> Self {
        Self {
            version,
            followers: followers.into_iter().map(Arc::new).collect(),
        }
    }

    /// Enabled followers subscribed to the given master
    pub fn followers_of(&self, master: &Pubkey) -> Vec<Arc<FollowerEntry>> {
        self.followers
            .iter()
            .filter(|f| f.enabled && &f.master_pubkey == master)
            .cloned()
            .collect()
    }

    /// Union of masters any enabled follower subscribes to
    pub fn master_set(&self) -> HashSet<Pubkey> {
        self.followers
            .iter()
            .filter(|f| f.enabled)
            .map(|f| f.master_pubkey)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.followers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.followers.is_empty()
    }
}

/// Change notification; the payload is the id, never a live reference
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Added(FollowerId),
    Updated(FollowerId),
    Removed(FollowerId),
}

#[async_trait]
pub trait ConfigStore: Send + Sync + 'static {
    async fn list_active_followers(&self) -> Result<ConfigSnapshot>;

    /// Change feed; the coordinator refreshes its snapshot on each event
    fn on_change(&self) -> broadcast::Receiver<ChangeEvent>;
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawFollower {
    follower_id: String,
    user_ref: String,
    key_handle: String,
    master_pubkey: String,
    input_size_raw: u64,
    slippage_bps: u16,
    max_per_trade_raw: u64,
    #[serde(default = "default_sell_fraction")]
    sell_fraction_bps: u16,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_sell_fraction() -> u16 {
    10_000
}

fn default_enabled() -> bool {
    true
}

/// File-backed store reloaded when the file's mtime moves
pub struct JsonFileConfigStore {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
    change_tx: broadcast::Sender<ChangeEvent>,
}

struct FileState {
    snapshot: ConfigSnapshot,
    mtime: Option<SystemTime>,
}

impl JsonFileConfigStore {
    pub async fn open(path: PathBuf) -> Result<Arc<Self>> {
        let (change_tx, _) = broadcast::channel(64);
        let store = Arc::new(Self {
            path,
            state: Arc::new(RwLock::new(FileState {
                snapshot: ConfigSnapshot::default(),
                mtime: None,
            })),
            change_tx,
        });
        store.reload().await.context("initial config load failed")?;
        store.clone().spawn_watcher();
        Ok(store)
    }

    fn spawn_watcher(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(2));
            loop {
                interval.tick().await;
                let mtime = tokio::fs::metadata(&self.path)
                    .await
                    .ok()
                    .and_then(|m| m.modified().ok());
                let changed = { self.state.read().mtime != mtime };
                if changed {
                    if let Err(e) = self.reload().await {
                        warn!("config reload failed, keeping last snapshot: {}", e);
                    }
                }
            }
        });
    }

    /// Re-read the file, diff against the current snapshot and emit events
    pub async fn reload(&self) -> Result<()> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        let raw: Vec<RawFollower> = serde_json::from_slice(&bytes).context("parsing followers")?;

        let mut followers = Vec::with_capacity(raw.len());
        for entry in raw {
            let master_pubkey = Pubkey::from_str(&entry.master_pubkey)
                .with_context(|| format!("bad master pubkey for {}", entry.follower_id))?;
            followers.push(FollowerEntry {
                follower_id: entry.follower_id,
                user_ref: entry.user_ref,
                key_handle: entry.key_handle,
                master_pubkey,
                input_size_raw: entry.input_size_raw,
                slippage_bps: entry.slippage_bps,
                max_per_trade_raw: entry.max_per_trade_raw,
                sell_fraction_bps: entry.sell_fraction_bps,
                enabled: entry.enabled,
            });
        }

        let mtime = tokio::fs::metadata(&self.path)
            .await
            .ok()
            .and_then(|m| m.modified().ok());

        let events = {
            let mut state = self.state.write();
            let old = std::mem::take(&mut state.snapshot);
            let version = old.version + 1;
            let new = ConfigSnapshot::new(version, followers);
            let events = diff_snapshots(&old, &new);
            state.snapshot = new;
            state.mtime = mtime;
            events
        };

        info!(
            "config reloaded: {} followers, {} change events",
            self.state.read().snapshot.len(),
            events.len()
        );
        for event in events {
            let _ = self.change_tx.send(event);
        }
        Ok(())
    }
}

fn diff_snapshots(old: &ConfigSnapshot, new: &ConfigSnapshot) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    let old_ids: std::collections::HashMap<&str, &Arc<FollowerEntry>> = old
        .followers
        .iter()
        .map(|f| (f.follower_id.as_str(), f))
        .collect();
    let new_ids: HashSet<&str> = new.followers.iter().map(|f| f.follower_id.as_str()).collect();

    for follower in &new.followers {
        match old_ids.get(follower.follower_id.as_str()) {
            None => events.push(ChangeEvent::Added(follower.follower_id.clone())),
            Some(previous) if ***previous != **follower => {
                events.push(ChangeEvent::Updated(follower.follower_id.clone()))
            }
            Some(_) => {}
        }
    }
    for follower in &old.followers {
        if !new_ids.contains(follower.follower_id.as_str()) {
            events.push(ChangeEvent::Removed(follower.follower_id.clone()));
        }
    }
    events
}

// ---------------------------------------------------------------------------
// In-memory store (tests, embedded deployments)
// ---------------------------------------------------------------------------

pub struct StaticConfigStore {
    snapshot: RwLock<ConfigSnapshot>,
    change_tx: broadcast::Sender<ChangeEvent>,
}

impl StaticConfigStore {
    pub fn new(followers: Vec<FollowerEntry>) -> Self {
        let (change_tx, _) = broadcast::channel(64);
        Self {
            snapshot: RwLock::new(ConfigSnapshot::new(1, followers)),
            change_tx,
        }
    }

    pub fn replace(&self, followers: Vec<FollowerEntry>) {
        let events = {
            let mut snapshot = self.snapshot.write();
            let old = std::mem::take(&mut *snapshot);
            let new = ConfigSnapshot::new(old.version + 1, followers);
            let events = diff_snapshots(&old, &new);
            *snapshot = new;
            events
        };
        for event in events {
            let _ = self.change_tx.send(event);
        }
    }
}

#[async_trait]
impl ConfigStore for StaticConfigStore {
    async fn list_active_followers(&self) -> Result<ConfigSnapshot> {
        Ok(self.snapshot.read().clone())
    }

    fn on_change(&self) -> broadcast::Receiver<ChangeEvent> {
        self.change_tx.subscribe()
    }
}

#[async_trait]
impl ConfigStore for JsonFileConfigStore {
    async fn list_active_followers(&self) -> Result<ConfigSnapshot> {
        Ok(self.state.read().snapshot.clone())
    }

    fn on_change(&self) -> broadcast::Receiver<ChangeEvent> {
        self.change_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn follower(id: &str, master: Pubkey, enabled: bool) -> FollowerEntry {
        FollowerEntry {
            follower_id: id.to_string(),
            user_ref: "user".to_string(),
            key_handle: format!("key-{}", id),
            master_pubkey: master,
            input_size_raw: 100_000_000,
            slippage_bps: 250,
            max_per_trade_raw: 500_000_000,
            sell_fraction_bps: 10_000,
            enabled,
        }
    }

    #[tokio::test]
    async fn test_snapshot_filters_by_master_and_enabled() {
        let master_a = Pubkey::new_unique();
        let master_b = Pubkey::new_unique();
        let store = StaticConfigStore::new(vec![
            follower("f1", master_a, true),
            follower("f2", master_a, false),
            follower("f3", master_b, true),
        ]);

        let snapshot = store.list_active_followers().await.unwrap();
        let of_a = snapshot.followers_of(&master_a);
        assert_eq!(of_a.len(), 1);
        assert_eq!(of_a[0].follower_id, "f1");

        let masters = snapshot.master_set();
        assert!(masters.contains(&master_a));
        assert!(masters.contains(&master_b));
        assert_eq!(masters.len(), 2);
    }

    #[tokio::test]
    async fn test_replace_emits_add_update_remove() {
        let master = Pubkey::new_unique();
        let store = StaticConfigStore::new(vec![follower("f1", master, true)]);
        let mut rx = store.on_change();

        let mut updated = follower("f1", master, true);
        updated.slippage_bps = 999;
        store.replace(vec![updated, follower("f2", master, true)]);

        let mut events = vec![rx.try_recv().unwrap(), rx.try_recv().unwrap()];
        events.sort_by_key(|e| format!("{:?}", e));
        assert!(events.contains(&ChangeEvent::Updated("f1".to_string())));
        assert!(events.contains(&ChangeEvent::Added("f2".to_string())));

        store.replace(vec![]);
        let mut removals = vec![rx.try_recv().unwrap(), rx.try_recv().unwrap()];
        removals.sort_by_key(|e| format!("{:?}", e));
        assert!(removals.contains(&ChangeEvent::Removed("f1".to_string())));
        assert!(removals.contains(&ChangeEvent::Removed("f2".to_string())));
    }
}
