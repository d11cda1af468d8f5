//! Error types for the Shardgate service.

use thiserror::Error;

/// Errors reported through the storage contract.
///
/// The in-memory store never produces these; they exist so that other
/// backends can surface their failures through the same interface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not serve the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The operation was abandoned before it ran
    #[error("store operation cancelled")]
    Cancelled,
}

/// Main error type for Shardgate operations.
#[derive(Error, Debug)]
pub enum ShardgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage primitive failures
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A limiter could not reach a decision because its store failed
    #[error("{algorithm} limiter error: {source}")]
    Limiter {
        algorithm: &'static str,
        #[source]
        source: StoreError,
    },

    /// Client SDK transport errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShardgateError {
    /// Wrap a store failure with the algorithm that observed it.
    pub fn limiter(algorithm: &'static str, source: StoreError) -> Self {
        ShardgateError::Limiter { algorithm, source }
    }
}

impl From<reqwest::Error> for ShardgateError {
    fn from(err: reqwest::Error) -> Self {
        ShardgateError::Http(err.to_string())
    }
}

impl From<config::ConfigError> for ShardgateError {
    fn from(err: config::ConfigError) -> Self {
        ShardgateError::Config(err.to_string())
    }
}

/// Result type alias for Shardgate operations.
pub type Result<T> = std::result::Result<T, ShardgateError>;
