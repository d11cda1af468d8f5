//! Configuration management for Shardgate.
//!
//! Values are layered: serde defaults, then an optional YAML file, then
//! `SHARDGATE__SECTION__FIELD` environment variables.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, ShardgateError};
use crate::http::HttpTimeouts;
use crate::ratelimit::Algorithm;
use crate::store::{StoreConfig, DEFAULT_GC_INTERVAL, DEFAULT_SHARD_COUNT, DEFAULT_STALE_AFTER};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "SHARDGATE";

/// Main configuration for the Shardgate service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Store configuration
    #[serde(default)]
    pub store: StoreSettings,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// How long in-flight requests may drain after a stop signal
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,

    /// Deadline for reading a request body
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Deadline for producing a complete response
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            shutdown_grace_ms: default_shutdown_grace(),
            read_timeout_ms: default_read_timeout(),
            write_timeout_ms: default_write_timeout(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_shutdown_grace() -> u64 {
    10_000
}

fn default_read_timeout() -> u64 {
    5_000
}

fn default_write_timeout() -> u64 {
    10_000
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn timeouts(&self) -> HttpTimeouts {
        HttpTimeouts {
            read: Duration::from_millis(self.read_timeout_ms),
            write: Duration::from_millis(self.write_timeout_ms),
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Number of shards, rounded up to a power of two
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,

    /// Background sweep interval in milliseconds
    #[serde(default = "default_gc_interval")]
    pub gc_interval_ms: u64,

    /// Idle time in milliseconds after which a timestamp log is swept
    #[serde(default = "default_stale_after")]
    pub stale_after_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
            gc_interval_ms: default_gc_interval(),
            stale_after_ms: default_stale_after(),
        }
    }
}

fn default_shard_count() -> usize {
    DEFAULT_SHARD_COUNT
}

fn default_gc_interval() -> u64 {
    DEFAULT_GC_INTERVAL.as_millis() as u64
}

fn default_stale_after() -> u64 {
    DEFAULT_STALE_AFTER.as_millis() as u64
}

impl StoreSettings {
    pub fn to_store_config(&self) -> StoreConfig {
        StoreConfig {
            shard_count: self.shard_count,
            gc_interval: Duration::from_millis(self.gc_interval_ms),
            stale_after: Duration::from_millis(self.stale_after_ms),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Admission algorithm
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Requests admitted per window
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u64,

    /// Window size in milliseconds
    #[serde(default = "default_window")]
    pub window_ms: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            requests_per_window: default_requests_per_window(),
            window_ms: default_window(),
        }
    }
}

fn default_requests_per_window() -> u64 {
    100
}

fn default_window() -> u64 {
    60_000
}

impl RateLimitingConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl ShardgateConfig {
    /// Load configuration from an optional YAML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: ShardgateConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ShardgateConfig =
            serde_yaml::from_str(yaml).map_err(|e| ShardgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the store and limiters cannot work with.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.server.read_timeout_ms == 0, "server.read_timeout_ms"),
            (self.server.write_timeout_ms == 0, "server.write_timeout_ms"),
            (self.store.shard_count == 0, "store.shard_count"),
            (self.store.gc_interval_ms == 0, "store.gc_interval_ms"),
            (self.store.stale_after_ms == 0, "store.stale_after_ms"),
            (
                self.rate_limiting.requests_per_window == 0,
                "rate_limiting.requests_per_window",
            ),
            (self.rate_limiting.window_ms == 0, "rate_limiting.window_ms"),
        ];

        match checks.iter().find(|(invalid, _)| *invalid) {
            Some((_, field)) => Err(ShardgateError::Config(format!(
                "{} must be greater than zero",
                field
            ))),
            None => Ok(()),
        }
    }
}
