//! DynamoDB response store.
//!
//! # Table Layout
//!
//! | Attribute        | Type   | Description                              |
//! |------------------|--------|------------------------------------------|
//! | `id`             | String | Partition key: the response id           |
//! | `ttl`            | Number | Epoch seconds for DynamoDB TTL           |
//! | `async_status`   | String | `in progress` or `complete`              |
//! | `async_response` | String | JSON-encoded result (`"N/A"` while running) |
//!
//! # Usage
//!
//! ```rust,no_run
//! use hapline::store::dynamodb::DynamoDbResponseStore;
//!
//! # async fn example() {
//! let store = DynamoDbResponseStore::from_env_with_table("shop-async-responses").await;
//! # }
//! ```

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::Utc;

use super::{AsyncResponse, AsyncStatus, ResponseStore, StoreError, RESPONSE_TTL_SECS};

/// Response store writing one item per response id.
#[derive(Debug, Clone)]
pub struct DynamoDbResponseStore {
    client: Client,
    table_name: String,
}

impl DynamoDbResponseStore {
    /// Creates a store with a pre-built DynamoDB client.
    ///
    /// The table must already exist with `id` (String) as partition key and
    /// TTL enabled on `ttl`.
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    /// Creates a store from the standard AWS SDK config chain.
    pub async fn from_env_with_table(table_name: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config), table_name)
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn map_sdk_error(err: impl std::error::Error + Send + Sync + 'static, key: &str) -> StoreError {
    StoreError::Backend {
        message: format!("DynamoDB error for response {key}: {err}"),
        source: Some(Box::new(err)),
    }
}

fn invalid_attribute(name: &str, key: &str) -> StoreError {
    StoreError::Backend {
        message: format!("missing or invalid {name} attribute for response {key}"),
        source: None,
    }
}

#[async_trait]
impl ResponseStore for DynamoDbResponseStore {
    async fn put(&self, response_id: &str, response: AsyncResponse) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(&response.response).map_err(|e| StoreError::Backend {
            message: format!("cannot encode response {response_id}: {e}"),
            source: Some(Box::new(e)),
        })?;
        let ttl = Utc::now().timestamp() + RESPONSE_TTL_SECS;

        self.client
            .put_item()
            .table_name(&self.table_name)
            .item("id", AttributeValue::S(response_id.to_string()))
            .item("ttl", AttributeValue::N(ttl.to_string()))
            .item(
                "async_status",
                AttributeValue::S(response.status.as_str().to_string()),
            )
            .item("async_response", AttributeValue::S(encoded))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, response_id))?;
        Ok(())
    }

    async fn get(&self, response_id: &str) -> Result<AsyncResponse, StoreError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("id", AttributeValue::S(response_id.to_string()))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, response_id))?;

        let item = result.item().ok_or_else(|| StoreError::NotFound {
            key: response_id.to_string(),
        })?;

        let status = item
            .get("async_status")
            .and_then(|v| v.as_s().ok())
            .and_then(|s| AsyncStatus::parse(s))
            .ok_or_else(|| invalid_attribute("async_status", response_id))?;

        let response = item
            .get("async_response")
            .and_then(|v| v.as_s().ok())
            .and_then(|s| serde_json::from_str(s).ok())
            .ok_or_else(|| invalid_attribute("async_response", response_id))?;

        Ok(AsyncResponse { status, response })
    }
}
