//! In-memory response store.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use super::{AsyncResponse, ResponseStore, StoreError, RESPONSE_TTL_SECS};

/// Thread-safe response store backed by a [`DashMap`].
///
/// Expired records are dropped lazily on read.
#[derive(Debug)]
pub struct InMemoryResponseStore {
    data: DashMap<String, (AsyncResponse, DateTime<Utc>)>,
    ttl: Duration,
}

impl InMemoryResponseStore {
    /// Creates an empty store with the standard record lifetime.
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            ttl: Duration::seconds(RESPONSE_TTL_SECS),
        }
    }

    /// Overrides the record lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Number of records held, expired ones included.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if no records are held.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for InMemoryResponseStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResponseStore for InMemoryResponseStore {
    async fn put(&self, response_id: &str, response: AsyncResponse) -> Result<(), StoreError> {
        self.data
            .insert(response_id.to_string(), (response, Utc::now() + self.ttl));
        Ok(())
    }

    async fn get(&self, response_id: &str) -> Result<AsyncResponse, StoreError> {
        if let Some(entry) = self.data.get(response_id) {
            let (response, expires_at) = entry.value();
            if *expires_at > Utc::now() {
                return Ok(response.clone());
            }
        }
        self.data
            .remove_if(response_id, |_, (_, expires_at)| *expires_at <= Utc::now());
        Err(StoreError::NotFound {
            key: response_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AsyncStatus;
    use serde_json::json;

    #[tokio::test]
    async fn put_overwrites_status() {
        let store = InMemoryResponseStore::new();
        store.mark_in_progress("r-1").await.unwrap();
        assert_eq!(
            store.get("r-1").await.unwrap().status,
            AsyncStatus::InProgress
        );
        store.complete("r-1", json!(7)).await.unwrap();
        let response = store.get("r-1").await.unwrap();
        assert_eq!(response.status, AsyncStatus::Complete);
        assert_eq!(response.response, json!(7));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn expired_records_are_not_found() {
        let store = InMemoryResponseStore::new().with_ttl(Duration::seconds(-1));
        store.complete("r-1", json!(null)).await.unwrap();
        assert!(matches!(
            store.get("r-1").await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(store.is_empty());
    }
}
