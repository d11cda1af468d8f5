//! Thin HTTP client for a running Shardgate instance.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ShardgateError};
use crate::store::StoreMetrics;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Body of `/healthz`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Client for the Shardgate HTTP endpoints.
#[derive(Debug, Clone)]
pub struct Client {
    base_url: String,
    http: reqwest::Client,
}

impl Client {
    /// Create a client with a 5s request timeout.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self::with_http_client(base_url, http))
    }

    /// Create a client on a preconfigured `reqwest::Client`.
    pub fn with_http_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, http }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Sending request");

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ShardgateError::Http(format!(
                "unexpected status {} from {}",
                status, url
            )));
        }
        Ok(response)
    }

    /// Check `/healthz`.
    ///
    /// A 200 whose body is not the expected JSON still counts as healthy.
    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self.get("/healthz").await?;
        Ok(response.json().await.unwrap_or_else(|_| HealthResponse {
            status: "ok".to_string(),
        }))
    }

    /// Fetch the store metrics snapshot from `/metrics`.
    pub async fn metrics(&self) -> Result<StoreMetrics> {
        let response = self.get("/metrics").await?;
        Ok(response.json().await?)
    }
}
