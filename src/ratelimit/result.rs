//! The outcome of an admission check.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Admission decision plus the quota metadata a transport needs to report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the caller may proceed
    pub allowed: bool,
    /// Requests permitted per window
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// When the current window resets
    pub reset_at: DateTime<Utc>,
    /// How long a denied caller should wait; zero when allowed
    pub retry_after: Duration,
}

impl RateLimitResult {
    pub fn allowed(limit: u64, remaining: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at,
            retry_after: Duration::ZERO,
        }
    }

    pub fn denied(limit: u64, reset_at: DateTime<Utc>, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at,
            retry_after,
        }
    }

    /// Reset instant as Unix seconds.
    pub fn reset_at_unix(&self) -> i64 {
        self.reset_at.timestamp()
    }

    /// Retry delay in whole seconds, rounded up.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}
