//! Store doubles for tests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::Store;
use crate::error::StoreError;

/// A backend whose every primitive fails.
pub(crate) struct FailingStore;

fn down() -> StoreError {
    StoreError::Unavailable("backend down".to_string())
}

#[async_trait]
impl Store for FailingStore {
    async fn increment(&self, _key: &str, _expiration: Duration) -> Result<u64, StoreError> {
        Err(down())
    }

    async fn add_timestamp(
        &self,
        _key: &str,
        _timestamp: DateTime<Utc>,
        _window: Duration,
    ) -> Result<(), StoreError> {
        Err(down())
    }

    async fn count_in_window(
        &self,
        _key: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Err(down())
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
