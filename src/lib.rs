//! Shardgate - Sharded Request Admission Gate
//!
//! This crate decides whether a caller may proceed under a bounded rate.
//! State lives in an in-process store split into independently locked
//! shards; fixed-window and sliding-window limiters are built on top of
//! it, and a thin HTTP adapter reports their decisions.

pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
