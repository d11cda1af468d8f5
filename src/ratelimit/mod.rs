//! Admission algorithms built on the storage contract.

mod backend;
mod fixed_window;
mod result;
mod sliding_window;

pub use backend::{build_limiter, Algorithm, RateLimiter};
pub use fixed_window::FixedWindowLimiter;
pub use result::RateLimitResult;
pub use sliding_window::SlidingWindowLimiter;
