//! Sharded in-memory store with background eviction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use super::shard::{IncrementOutcome, Shard};
use super::{Store, StoreConfig, StoreMetrics};
use crate::clock::{self, Clock, SystemClock};
use crate::error::StoreError;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Lower bound on the sweep period; a zero interval would spin.
const MIN_GC_INTERVAL: Duration = Duration::from_millis(1);

/// 32-bit FNV-1a.
fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// State shared between request handlers and the sweep task.
#[derive(Debug)]
struct Inner {
    shards: Box<[Shard]>,
    mask: usize,
    stale_after: Duration,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl Inner {
    fn shard_index(&self, key: &str) -> usize {
        fnv1a_32(key.as_bytes()) as usize & self.mask
    }

    fn shard(&self, key: &str) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    fn sweep(&self) -> usize {
        let now = self.clock.now();

        let removed: usize = self
            .shards
            .iter()
            .map(|shard| shard.sweep(now, self.stale_after))
            .sum();

        if removed > 0 {
            self.counters
                .evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed = removed, "Sweep evicted stale entries");
        } else {
            trace!("Sweep found nothing to evict");
        }

        removed
    }
}

/// Handle on the running sweep task.
#[derive(Debug)]
struct Sweeper {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// In-memory store partitioned into independently locked shards.
///
/// Keys are routed with FNV-1a over a power-of-two shard array, so a key
/// always lands on the same shard. A background task sweeps expired
/// counters and abandoned timestamp logs until [`Store::close`] is called.
#[derive(Debug)]
pub struct ShardedStore {
    inner: Arc<Inner>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl ShardedStore {
    /// Create a store on the system clock.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: StoreConfig) -> Self {
        Self::start(config, Arc::new(SystemClock))
    }

    /// Create a store on the given clock and start its sweep task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        let shard_count = config.shard_count.max(1).next_power_of_two();
        let shards: Box<[Shard]> = (0..shard_count).map(|_| Shard::new()).collect();

        let inner = Arc::new(Inner {
            shards,
            mask: shard_count - 1,
            stale_after: config.stale_after,
            clock,
            counters: Counters::default(),
        });

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_sweeper(inner.clone(), config.gc_interval, stop_rx));

        info!(
            shard_count = shard_count,
            gc_interval = ?config.gc_interval,
            stale_after = ?config.stale_after,
            "Sharded store started"
        );

        Self {
            inner,
            sweeper: Mutex::new(Some(Sweeper { stop, handle })),
        }
    }

    /// Index of the shard that owns `key`.
    pub fn shard_index(&self, key: &str) -> usize {
        self.inner.shard_index(key)
    }

    /// Number of shards actually allocated.
    pub fn shard_count(&self) -> usize {
        self.inner.shards.len()
    }

    /// Evict expired counters and stale timestamp logs from every shard.
    ///
    /// Returns the number of keys removed. Normally only the background task
    /// calls this.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    /// Snapshot of hit/miss/eviction counters and live key totals.
    pub fn metrics(&self) -> StoreMetrics {
        let counters = &self.inner.counters;
        StoreMetrics {
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            shard_count: self.shard_count(),
            live_keys: self.inner.shards.iter().map(Shard::len).sum(),
        }
    }

    /// Whether the sweep task is still owned by this store.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper.lock().is_some()
    }
}

#[async_trait]
impl Store for ShardedStore {
    async fn increment(&self, key: &str, expiration: Duration) -> Result<u64, StoreError> {
        let now = self.inner.clock.now();
        let expires_at = clock::add(now, expiration);
        let (count, outcome) = self.inner.shard(key).increment(key, now, expires_at);

        let counters = &self.inner.counters;
        match outcome {
            IncrementOutcome::Hit => {
                counters.hits.fetch_add(1, Ordering::Relaxed);
            }
            IncrementOutcome::Created => {
                counters.misses.fetch_add(1, Ordering::Relaxed);
            }
            IncrementOutcome::Replaced => {
                counters.misses.fetch_add(1, Ordering::Relaxed);
                counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        Ok(count)
    }

    async fn add_timestamp(
        &self,
        key: &str,
        timestamp: DateTime<Utc>,
        window: Duration,
    ) -> Result<(), StoreError> {
        let pruned = self.inner.shard(key).add_timestamp(key, timestamp, window);

        if pruned > 0 {
            self.inner
                .counters
                .evictions
                .fetch_add(pruned as u64, Ordering::Relaxed);
        }

        Ok(())
    }

    async fn count_in_window(
        &self,
        key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let counters = &self.inner.counters;
        match self.inner.shard(key).count_in_window(key, start, end) {
            Some(count) => {
                counters.hits.fetch_add(1, Ordering::Relaxed);
                Ok(count as u64)
            }
            None => {
                counters.misses.fetch_add(1, Ordering::Relaxed);
                Ok(0)
            }
        }
    }

    async fn close(&self) -> Result<(), StoreError> {
        let sweeper = self.sweeper.lock().take();
        let Some(Sweeper { stop, handle }) = sweeper else {
            return Ok(());
        };

        // The task may already be gone if the runtime is shutting down.
        let _ = stop.send(true);
        handle.await.map_err(|e| {
            warn!(error = %e, "Sweep task did not exit cleanly");
            StoreError::Unavailable(format!("sweep task failed: {}", e))
        })?;

        info!("Sharded store closed");
        Ok(())
    }

    fn metrics(&self) -> Option<StoreMetrics> {
        Some(ShardedStore::metrics(self))
    }
}

impl Drop for ShardedStore {
    fn drop(&mut self) {
        if let Some(Sweeper { stop, handle }) = self.sweeper.get_mut().take() {
            let _ = stop.send(true);
            handle.abort();
        }
    }
}

async fn run_sweeper(inner: Arc<Inner>, interval: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval.max(MIN_GC_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately.
    ticker.tick().await;

    debug!(interval = ?interval, "Sweep task running");

    loop {
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                inner.sweep();
            }
        }
    }

    debug!("Sweep task stopped");
}
