//! Counting and windowing storage.
//!
//! Limiters talk to storage only through the [`Store`] trait. The default
//! backend is the in-process [`ShardedStore`].

mod memory;
mod shard;
#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use memory::ShardedStore;

/// Default number of shards.
pub const DEFAULT_SHARD_COUNT: usize = 64;
/// Default interval between background sweeps.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(30);
/// Default idle time after which a timestamp log is swept.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// Storage contract shared by all limiter algorithms.
#[async_trait]
pub trait Store: Send + Sync {
    /// Bump the counter for `key`, creating it with a lifetime of
    /// `expiration` if it is missing or expired. Returns the new count.
    async fn increment(&self, key: &str, expiration: Duration) -> Result<u64, StoreError>;

    /// Record `timestamp` in the log for `key`, first dropping entries that
    /// are older than `window` relative to `timestamp`.
    ///
    /// Timestamps must be supplied in non-decreasing order per key.
    async fn add_timestamp(
        &self,
        key: &str,
        timestamp: DateTime<Utc>,
        window: Duration,
    ) -> Result<(), StoreError>;

    /// Number of logged timestamps for `key` within `[start, end]`.
    async fn count_in_window(
        &self,
        key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Stop background work owned by the store.
    async fn close(&self) -> Result<(), StoreError>;

    /// Point-in-time usage snapshot, if the backend keeps one.
    fn metrics(&self) -> Option<StoreMetrics> {
        None
    }
}

/// Tuning knobs for [`ShardedStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Requested shard count, rounded up to a power of two
    pub shard_count: usize,
    /// How often the background sweep runs
    pub gc_interval: Duration,
    /// Idle time after which a timestamp log is considered abandoned
    pub stale_after: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
            gc_interval: DEFAULT_GC_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

/// Aggregate view over all shards.
///
/// Each shard is read under its own lock, so the totals are not a single
/// atomic snapshot across shards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub shard_count: usize,
    pub live_keys: usize,
}
