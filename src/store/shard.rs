//! A single lock-protected partition of the key space.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::clock;

/// A fixed-window bucket's running count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CounterEntry {
    pub count: u64,
    pub expires_at: DateTime<Utc>,
}

impl CounterEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// How an increment found its counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IncrementOutcome {
    /// A live entry was bumped
    Hit,
    /// No entry existed, a fresh one was created
    Created,
    /// An expired entry was thrown away and replaced
    Replaced,
}

/// A sliding-window log and the window it was last written with.
#[derive(Debug)]
struct TimestampLog {
    /// Always sorted ascending.
    entries: VecDeque<DateTime<Utc>>,
    window: Duration,
}

#[derive(Debug, Default)]
struct ShardMaps {
    counters: HashMap<String, CounterEntry>,
    timestamps: HashMap<String, TimestampLog>,
}

/// One shard: counters and timestamp logs behind a single read/write lock.
#[derive(Debug, Default)]
pub(crate) struct Shard {
    maps: RwLock<ShardMaps>,
}

impl Shard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump the counter for `key`, starting a new one that expires at
    /// `expires_at` when none is live.
    pub fn increment(
        &self,
        key: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> (u64, IncrementOutcome) {
        let mut maps = self.maps.write();

        let outcome = match maps.counters.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.count += 1;
                return (entry.count, IncrementOutcome::Hit);
            }
            Some(_) => IncrementOutcome::Replaced,
            None => IncrementOutcome::Created,
        };

        maps.counters.insert(
            key.to_string(),
            CounterEntry {
                count: 1,
                expires_at,
            },
        );
        (1, outcome)
    }

    /// Prune entries at or before `t - window` from the log for `key`, then
    /// append `t`. Returns how many entries were pruned.
    pub fn add_timestamp(&self, key: &str, t: DateTime<Utc>, window: Duration) -> usize {
        let cutoff = clock::sub(t, window);
        let mut maps = self.maps.write();

        if let Some(log) = maps.timestamps.get_mut(key) {
            let keep_from = log.entries.partition_point(|ts| *ts <= cutoff);
            log.entries.drain(..keep_from);
            log.entries.push_back(t);
            log.window = window;
            return keep_from;
        }

        maps.timestamps.insert(
            key.to_string(),
            TimestampLog {
                entries: VecDeque::from([t]),
                window,
            },
        );
        0
    }

    /// Number of logged timestamps in `[start, end]`.
    ///
    /// Returns `None` when the key has no log or the log is empty.
    pub fn count_in_window(
        &self,
        key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<usize> {
        let maps = self.maps.read();

        let log = &maps.timestamps.get(key).filter(|log| !log.entries.is_empty())?.entries;
        let first = log.partition_point(|ts| *ts < start);
        let past_end = log.partition_point(|ts| *ts <= end);

        Some(past_end.saturating_sub(first))
    }

    /// Drop expired counters and idle timestamp logs. Returns how many keys
    /// were removed.
    ///
    /// A log is idle once its newest entry is at least `stale_after` old and
    /// has also left the log's own window, so a window longer than
    /// `stale_after` is never cut short.
    pub fn sweep(&self, now: DateTime<Utc>, stale_after: Duration) -> usize {
        let mut maps = self.maps.write();
        let before = maps.counters.len() + maps.timestamps.len();

        maps.counters.retain(|_, entry| !entry.is_expired(now));
        maps.timestamps.retain(|_, log| {
            let cutoff = clock::sub(now, stale_after.max(log.window));
            log.entries.back().is_some_and(|newest| *newest > cutoff)
        });

        before - (maps.counters.len() + maps.timestamps.len())
    }

    /// Number of keys held, counters and logs combined.
    pub fn len(&self) -> usize {
        let maps = self.maps.read();
        maps.counters.len() + maps.timestamps.len()
    }

    #[cfg(test)]
    pub fn counter(&self, key: &str) -> Option<CounterEntry> {
        self.maps.read().counters.get(key).copied()
    }

    #[cfg(test)]
    pub fn log_len(&self, key: &str) -> Option<usize> {
        self.maps.read().timestamps.get(key).map(|log| log.entries.len())
    }
}
