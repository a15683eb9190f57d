//! The sharded, TTL-aware keyspace.
//!
//! Keys are partitioned across a fixed number of shards by FNV-1a hash;
//! each shard guards its map with its own reader-writer lock, so there
//! is no global store lock. Expired items are removed lazily on read
//! and by a background sweeper that ticks once a minute.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use flashdb_persistence::format::FormatError;
use flashdb_persistence::snapshot::{self, SnapshotEntry};

use crate::hash::fnv1a32;
use crate::time::{self, NO_EXPIRY};

/// Number of shards a store is created with unless told otherwise.
pub const DEFAULT_SHARD_COUNT: usize = 16;

/// How often the background sweeper scans for expired items.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A stored value together with its expiry deadline.
///
/// An item whose deadline has passed is logically absent: readers never
/// see it, even if the sweeper hasn't removed it yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub value: Bytes,
    /// Absolute expiry in nanoseconds since the epoch; `0` means never.
    pub expires_at_ns: i64,
}

impl Item {
    pub fn is_expired(&self) -> bool {
        time::is_expired(self.expires_at_ns)
    }

    /// Remaining TTL in whole seconds, or `None` if the item never expires.
    pub fn remaining_secs(&self) -> Option<i64> {
        time::remaining_secs(self.expires_at_ns)
    }
}

/// One independently locked partition of the keyspace.
struct Shard {
    data: RwLock<HashMap<Bytes, Item>>,
}

impl Shard {
    fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }
}

/// The in-memory store: a fixed sequence of shards plus the shutdown
/// signal its background tasks watch.
pub struct Store {
    shards: Vec<Shard>,
    shutdown: broadcast::Sender<()>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Store {
    /// Creates a store with [`DEFAULT_SHARD_COUNT`] shards and starts
    /// the background expiry sweeper. Must be called inside a tokio
    /// runtime.
    pub fn new() -> Arc<Self> {
        Self::with_shards(DEFAULT_SHARD_COUNT)
    }

    /// Creates a store with a fixed shard count. The count is immutable
    /// for the lifetime of the store — shard assignment depends on it.
    pub fn with_shards(count: usize) -> Arc<Self> {
        assert!(count > 0, "store needs at least one shard");

        let (shutdown, _) = broadcast::channel(1);
        let store = Arc::new(Self {
            shards: (0..count).map(|_| Shard::new()).collect(),
            shutdown,
            sweeper: Mutex::new(None),
        });

        let handle = spawn_sweeper(&store);
        *store.sweeper.lock().expect("sweeper mutex poisoned") = Some(handle);
        store
    }

    /// Returns the shard index a key maps to. Stable across runs for a
    /// given shard count.
    pub fn shard_index(&self, key: &[u8]) -> usize {
        (fnv1a32(key) as usize) % self.shards.len()
    }

    fn shard_for(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Inserts or overwrites a key. A `ttl` of `None` (or zero) means
    /// the item never expires. Returns the stored item.
    pub fn set(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) -> Item {
        let item = Item {
            value,
            expires_at_ns: time::expiry_after(ttl),
        };
        let shard = self.shard_for(&key);
        shard
            .data
            .write()
            .expect("shard lock poisoned")
            .insert(key, item.clone());
        item
    }

    /// Looks up a key, lazily evicting it if expired.
    ///
    /// The expiry check runs first under the read lock; eviction
    /// re-checks under the write lock, because another writer may have
    /// refreshed the key between the two acquisitions.
    pub fn get(&self, key: &[u8]) -> Option<Item> {
        let shard = self.shard_for(key);

        {
            let data = shard.data.read().expect("shard lock poisoned");
            match data.get(key) {
                None => return None,
                Some(item) if !item.is_expired() => return Some(item.clone()),
                Some(_) => {} // expired: fall through to evict
            }
        }

        let mut data = shard.data.write().expect("shard lock poisoned");
        match data.get(key) {
            Some(item) if item.is_expired() => {
                data.remove(key);
                None
            }
            Some(item) => Some(item.clone()),
            None => None,
        }
    }

    /// Removes a key. Returns whether a mapping existed.
    pub fn delete(&self, key: &[u8]) -> bool {
        let shard = self.shard_for(key);
        shard
            .data
            .write()
            .expect("shard lock poisoned")
            .remove(key)
            .is_some()
    }

    /// Rewrites the expiry deadline of an existing key.
    ///
    /// Returns `false` if the key is absent or already expired (an
    /// expired key is evicted on the way out).
    pub fn expire_at(&self, key: &[u8], expires_at_ns: i64) -> bool {
        let shard = self.shard_for(key);
        let mut data = shard.data.write().expect("shard lock poisoned");
        match data.get_mut(key) {
            Some(item) if item.is_expired() => {
                data.remove(key);
                false
            }
            Some(item) => {
                item.expires_at_ns = expires_at_ns;
                true
            }
            None => false,
        }
    }

    /// Number of entries across all shards, counting items the sweeper
    /// hasn't evicted yet.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.data.read().expect("shard lock poisoned").len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dumps all non-expired items as a plain key→value map.
    ///
    /// TTLs are dropped on purpose: the replication full-sync payload
    /// carries values only.
    pub fn export(&self) -> HashMap<Bytes, Bytes> {
        let mut out = HashMap::new();
        for shard in &self.shards {
            let data = shard.data.read().expect("shard lock poisoned");
            for (key, item) in data.iter() {
                if !item.is_expired() {
                    out.insert(key.clone(), item.value.clone());
                }
            }
        }
        out
    }

    /// Bulk-inserts a key→value map, with no expiries.
    pub fn import(&self, map: HashMap<Bytes, Bytes>) {
        for (key, value) in map {
            self.set(key, value, None);
        }
    }

    /// Writes a snapshot of all non-expired items to `path`.
    ///
    /// Each shard's read lock is held only while its items are copied
    /// out, so unrelated shards stay writable during the disk write.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<(), FormatError> {
        let mut entries = Vec::new();
        for shard in &self.shards {
            let data = shard.data.read().expect("shard lock poisoned");
            for (key, item) in data.iter() {
                if !item.is_expired() {
                    entries.push(SnapshotEntry {
                        key: key.clone(),
                        value: item.value.clone(),
                        expires_at_ns: item.expires_at_ns,
                    });
                }
            }
        }
        snapshot::write_snapshot(path, &entries)
    }

    /// Loads a snapshot into the store.
    ///
    /// Records whose expiry passed while the file sat on disk are
    /// skipped; live records keep their original absolute deadline.
    /// Returns the number of items restored.
    pub fn load(&self, path: impl AsRef<std::path::Path>) -> Result<usize, FormatError> {
        let entries = snapshot::read_snapshot(path)?;
        let now = time::now_ns();

        let mut restored = 0;
        for entry in entries {
            if entry.expires_at_ns > 0 && now >= entry.expires_at_ns {
                continue;
            }
            let item = Item {
                value: entry.value,
                expires_at_ns: entry.expires_at_ns.max(NO_EXPIRY),
            };
            let shard = self.shard_for(&entry.key);
            shard
                .data
                .write()
                .expect("shard lock poisoned")
                .insert(entry.key, item);
            restored += 1;
        }
        Ok(restored)
    }

    /// Removes every expired entry, one shard at a time. Returns the
    /// number of entries removed. This is the sweeper's work function.
    pub fn sweep_expired(&self) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut data = shard.data.write().expect("shard lock poisoned");
            let before = data.len();
            data.retain(|_, item| !item.is_expired());
            removed += before - data.len();
        }
        removed
    }

    /// A receiver on the shutdown signal, for long-running loops that
    /// should stop when the store closes (autosave, replication accept).
    pub fn stop_chan(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Signals background tasks to stop and waits for them to exit.
    pub async fn close(&self) {
        let _ = self.shutdown.send(());
        let handle = self.sweeper.lock().expect("sweeper mutex poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Spawns the background expiry sweeper for a store.
///
/// Holds only a `Weak` reference so the sweeper never keeps the store
/// alive on its own; it exits on the shutdown signal or once the store
/// is gone.
fn spawn_sweeper(store: &Arc<Store>) -> JoinHandle<()> {
    let weak: Weak<Store> = Arc::downgrade(store);
    let mut stop = store.shutdown.subscribe();

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick.tick().await; // the first tick completes immediately

        loop {
            tokio::select! {
                _ = stop.recv() => return,
                _ = tick.tick() => {
                    let Some(store) = weak.upgrade() else { return };
                    let removed = store.sweep_expired();
                    if removed > 0 {
                        debug!(removed, "swept expired keys");
                    }
                }
            }
        }
    })
}
