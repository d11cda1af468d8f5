//! Fixed-window admission.
//!
//! Requests are counted in clock-aligned buckets: with a 60s window,
//! 10:15:37 falls in the bucket that started at 10:15:00. Each bucket is a
//! separate store counter that expires when the bucket ends.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::backend::{validate_params, Algorithm, RateLimiter};
use super::result::RateLimitResult;
use crate::clock::{self, Clock, SystemClock};
use crate::error::{Result, ShardgateError};
use crate::store::Store;

/// Fixed-window limiter over a shared [`Store`].
pub struct FixedWindowLimiter {
    store: Arc<dyn Store>,
    limit: u64,
    window: Duration,
    window_ms: i64,
    clock: Arc<dyn Clock>,
}

impl FixedWindowLimiter {
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
        let window_ms = validate_params(limit, window)?;
        Ok(Self {
            store,
            limit,
            window,
            window_ms,
            clock,
        })
    }

    /// Start of the bucket containing `now`, in Unix milliseconds.
    fn window_start_ms(&self, now: DateTime<Utc>) -> i64 {
        let now_ms = now.timestamp_millis();
        now_ms - now_ms.rem_euclid(self.window_ms)
    }

    /// Store key for the bucket of `key` starting at `window_start_ms`.
    pub fn store_key(key: &str, window_start_ms: i64) -> String {
        format!("rl:fw:{}:{}", key, window_start_ms)
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
    async fn allow(&self, key: &str) -> Result<RateLimitResult> {
        let now = self.clock.now();
        let start_ms = self.window_start_ms(now);
        let window_start = DateTime::from_timestamp_millis(start_ms).unwrap_or(now);
        let reset_at = clock::add(window_start, self.window);
        let store_key = Self::store_key(key, start_ms);

        let count = self
            .store
            .increment(&store_key, clock::until(now, reset_at))
            .await
            .map_err(|e| ShardgateError::limiter(Algorithm::FixedWindow.as_str(), e))?;

        trace!(key = %key, count = count, limit = self.limit, "Fixed window count");

        if count > self.limit {
            debug!(
                key = %key,
                count = count,
                limit = self.limit,
                "Fixed window limit exceeded"
            );
            return Ok(RateLimitResult::denied(
                self.limit,
                reset_at,
                clock::until(now, reset_at),
            ));
        }

        Ok(RateLimitResult::allowed(self.limit, self.limit - count, reset_at))
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::FixedWindow
    }
}
