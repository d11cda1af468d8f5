//! Sliding-window admission over a per-key timestamp log.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::backend::{validate_params, Algorithm, RateLimiter};
use super::result::RateLimitResult;
use crate::clock::{self, Clock, SystemClock};
use crate::error::{Result, ShardgateError};
use crate::store::Store;

/// Sliding-window limiter over a shared [`Store`].
///
/// A request is admitted when fewer than `limit` requests were admitted in
/// the trailing `window`. Counting and recording are two separate store
/// calls, so concurrent requests for the same key can each see `limit - 1`
/// and both be admitted; the overshoot is bounded by the number of racing
/// callers.
pub struct SlidingWindowLimiter {
    store: Arc<dyn Store>,
    limit: u64,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    /// Create a limiter on the system clock.
    pub fn new(store: Arc<dyn Store>, limit: u64, window: Duration) -> Result<Self> {
        Self::with_clock(store, limit, window, Arc::new(SystemClock))
    }

    /// Create a limiter reading time from `clock`.
    pub fn with_clock(
        store: Arc<dyn Store>,
        limit: u64,
        window: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        validate_params(limit, window)?;
        Ok(Self {
            store,
            limit,
            window,
            clock,
        })
    }

    /// Store key holding the timestamp log of `key`.
    pub fn store_key(key: &str) -> String {
        format!("rl:sw:{}", key)
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn allow(&self, key: &str) -> Result<RateLimitResult> {
        let now = self.clock.now();
        let window_start = clock::sub(now, self.window);
        let store_key = Self::store_key(key);
        let algorithm = Algorithm::SlidingWindow.as_str();

        let count = self
            .store
            .count_in_window(&store_key, window_start, now)
            .await
            .map_err(|e| ShardgateError::limiter(algorithm, e))?;

        trace!(key = %key, count = count, limit = self.limit, "Sliding window count");

        let reset_at = clock::add(now, self.window);

        if count >= self.limit {
            debug!(
                key = %key,
                count = count,
                limit = self.limit,
                "Sliding window limit exceeded"
            );
            // Coarse: a full window rather than the age of the oldest entry.
            return Ok(RateLimitResult::denied(self.limit, reset_at, self.window));
        }

        self.store
            .add_timestamp(&store_key, now, self.window)
            .await
            .map_err(|e| ShardgateError::limiter(algorithm, e))?;

        Ok(RateLimitResult::allowed(
            self.limit,
            self.limit - count - 1,
            reset_at,
        ))
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindow
    }
}
