//! Rate limiter trait for abstracting over admission algorithms.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::fixed_window::FixedWindowLimiter;
use super::result::RateLimitResult;
use super::sliding_window::SlidingWindowLimiter;
use crate::clock::Clock;
use crate::error::{Result, ShardgateError};
use crate::store::Store;

/// Trait for rate limiter implementations.
///
/// This trait abstracts over the fixed and sliding window limiters so the
/// HTTP layer can work with either.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Decide whether the caller identified by `key` may proceed.
    async fn allow(&self, key: &str) -> Result<RateLimitResult>;

    /// The algorithm behind this limiter.
    fn algorithm(&self) -> Algorithm;
}

/// Admission algorithm selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Clock-aligned, non-overlapping buckets
    #[default]
    FixedWindow,
    /// Rolling trailing interval over a timestamp log
    SlidingWindow,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::SlidingWindow => "sliding_window",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "fixed_window" | "fixed" => Ok(Algorithm::FixedWindow),
            "sliding_window" | "sliding" => Ok(Algorithm::SlidingWindow),
            other => Err(format!("unknown algorithm: {}", other)),
        }
    }
}

/// Build the limiter for `algorithm` on top of `store`.
pub fn build_limiter(
    algorithm: Algorithm,
    store: Arc<dyn Store>,
    limit: u64,
    window: Duration,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn RateLimiter>> {
    let limiter: Arc<dyn RateLimiter> = match algorithm {
        Algorithm::FixedWindow => Arc::new(FixedWindowLimiter::with_clock(store, limit, window, clock)?),
        Algorithm::SlidingWindow => {
            Arc::new(SlidingWindowLimiter::with_clock(store, limit, window, clock)?)
        }
    };
    Ok(limiter)
}

/// Check limiter parameters and return the window in whole milliseconds.
pub(crate) fn validate_params(limit: u64, window: Duration) -> Result<i64> {
    if limit == 0 {
        return Err(ShardgateError::Config("limit must be greater than zero".to_string()));
    }
    if window < Duration::from_millis(1) {
        return Err(ShardgateError::Config(format!(
            "window must be at least 1ms, got {:?}",
            window
        )));
    }
    i64::try_from(window.as_millis())
        .map_err(|_| ShardgateError::Config(format!("window too large: {:?}", window)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::store::{ShardedStore, StoreConfig};

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!("fixed_window".parse::<Algorithm>(), Ok(Algorithm::FixedWindow));
        assert_eq!("Sliding-Window".parse::<Algorithm>(), Ok(Algorithm::SlidingWindow));
        assert_eq!("sliding".parse::<Algorithm>(), Ok(Algorithm::SlidingWindow));
        assert!("token_bucket".parse::<Algorithm>().is_err());
        assert_eq!(Algorithm::SlidingWindow.to_string(), "sliding_window");
    }

    #[test]
    fn test_validate_params() {
        assert_eq!(validate_params(1, Duration::from_secs(1)).unwrap(), 1000);
        assert!(validate_params(0, Duration::from_secs(1)).is_err());
        assert!(validate_params(1, Duration::from_micros(999)).is_err());
        assert!(validate_params(1, Duration::MAX).is_err());
    }

    #[tokio::test]
    async fn test_build_limiter_selects_algorithm() {
        let store = Arc::new(ShardedStore::new(StoreConfig::default()));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        for algorithm in [Algorithm::FixedWindow, Algorithm::SlidingWindow] {
            let limiter = build_limiter(
                algorithm,
                store.clone(),
                10,
                Duration::from_secs(1),
                clock.clone(),
            )
            .unwrap();
            assert_eq!(limiter.algorithm(), algorithm);
            assert!(limiter.allow("caller").await.unwrap().allowed);
        }

        assert!(build_limiter(
            Algorithm::FixedWindow,
            store.clone(),
            0,
            Duration::from_secs(1),
            clock,
        )
        .is_err());

        store.close().await.unwrap();
    }
}
