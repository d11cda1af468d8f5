//! HTTP transport adapter.
//!
//! Maps each request to a caller key, asks the configured limiter for a
//! decision and reports it through the `X-RateLimit-*` headers.

mod middleware;
mod server;

pub use middleware::{extract_key, rate_limit};
pub use server::{router, stop_signal, HttpServer, HttpTimeouts};
