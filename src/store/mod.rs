//! Response store for captured async results.
//!
//! When a task is sent with response capture, the receiving invocation
//! writes an `in progress` record under the message's `response_id` before
//! running the target, then overwrites it with the result and a `complete`
//! status. Callers poll with [`get_async_response`].
//!
//! Records expire [`RESPONSE_TTL_SECS`] after they are written.
//!
//! # Examples
//!
//! ```
//! use hapline::store::{get_async_response, AsyncStatus, InMemoryResponseStore, ResponseStore};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = InMemoryResponseStore::new();
//! store.mark_in_progress("r-1").await.unwrap();
//! store.complete("r-1", json!({"total": 3})).await.unwrap();
//!
//! let response = get_async_response(&store, "r-1").await.unwrap().unwrap();
//! assert_eq!(response.status, AsyncStatus::Complete);
//! assert_eq!(response.response, json!({"total": 3}));
//! # }
//! ```

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BoxError;

pub mod memory;

#[cfg(feature = "dynamodb")]
pub mod dynamodb;

pub use memory::InMemoryResponseStore;

/// Seconds a response record lives after its last write.
pub const RESPONSE_TTL_SECS: i64 = 600;

/// Placeholder response held while the task runs.
pub const PENDING_RESPONSE: &str = "N/A";

/// Progress of a captured task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AsyncStatus {
    /// The target function has been picked up but has not returned.
    #[serde(rename = "in progress")]
    InProgress,
    /// The target function returned and its result is stored.
    #[serde(rename = "complete")]
    Complete,
}

impl AsyncStatus {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in progress",
            Self::Complete => "complete",
        }
    }

    /// Parses the stored representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in progress" => Some(Self::InProgress),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

/// A stored task result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncResponse {
    /// Progress of the task.
    pub status: AsyncStatus,
    /// Result of the task, or [`PENDING_RESPONSE`] while in progress.
    pub response: Value,
}

impl AsyncResponse {
    /// Record written before the target runs.
    pub fn pending() -> Self {
        Self {
            status: AsyncStatus::InProgress,
            response: Value::String(PENDING_RESPONSE.to_string()),
        }
    }

    /// Record written once the target returned `response`.
    pub fn complete(response: Value) -> Self {
        Self {
            status: AsyncStatus::Complete,
            response,
        }
    }
}

/// Errors from response store operations.
#[derive(Debug)]
pub enum StoreError {
    /// No record is stored under the key (or it expired).
    NotFound {
        /// The missing response id.
        key: String,
    },

    /// The backing store failed.
    Backend {
        /// Human-readable description of the error.
        message: String,
        /// The underlying error, if available.
        source: Option<BoxError>,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { key } => write!(f, "response not found: {key}"),
            Self::Backend { message, .. } => write!(f, "response store error: {message}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backend {
                source: Some(src), ..
            } => Some(src.as_ref()),
            _ => None,
        }
    }
}

/// Key-value store holding captured task results.
///
/// Implementations must be `Send + Sync`; one store is shared by every
/// invocation of a warm process.
#[async_trait]
pub trait ResponseStore: Send + Sync {
    /// Writes `response` under `response_id`, replacing any previous record
    /// and refreshing its expiry.
    async fn put(&self, response_id: &str, response: AsyncResponse) -> Result<(), StoreError>;

    /// Reads the record stored under `response_id`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when nothing (or only an expired record) is
    /// stored.
    async fn get(&self, response_id: &str) -> Result<AsyncResponse, StoreError>;

    /// Records that the task has been picked up.
    async fn mark_in_progress(&self, response_id: &str) -> Result<(), StoreError> {
        self.put(response_id, AsyncResponse::pending()).await
    }

    /// Stores the task's result.
    async fn complete(&self, response_id: &str, response: Value) -> Result<(), StoreError> {
        self.put(response_id, AsyncResponse::complete(response)).await
    }
}

/// Reads a captured result, mapping a missing record to `None`.
pub async fn get_async_response(
    store: &dyn ResponseStore,
    response_id: &str,
) -> Result<Option<AsyncResponse>, StoreError> {
    match store.get(response_id).await {
        Ok(response) => Ok(Some(response)),
        Err(StoreError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_uses_stored_names() {
        assert_eq!(
            serde_json::to_value(AsyncStatus::InProgress).unwrap(),
            "in progress"
        );
        assert_eq!(AsyncStatus::parse("complete"), Some(AsyncStatus::Complete));
        assert_eq!(AsyncStatus::parse("done"), None);
    }

    #[test]
    fn backend_error_exposes_source() {
        use std::error::Error as _;

        let err = StoreError::Backend {
            message: "timeout".to_string(),
            source: Some("socket closed".into()),
        };
        assert_eq!(err.to_string(), "response store error: timeout");
        assert!(err.source().is_some());
    }

    #[tokio::test]
    async fn missing_response_is_none() {
        let store = InMemoryResponseStore::new();
        assert!(get_async_response(&store, "nope").await.unwrap().is_none());
    }
}
