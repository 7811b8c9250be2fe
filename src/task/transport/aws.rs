//! AWS SDK implementations of the platform clients.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hapline::environment::PlatformEnvironment;
//! use hapline::task::transport::aws::AwsClients;
//! use hapline::task::transport::SqsTransport;
//!
//! # async fn example() {
//! let clients = AwsClients::from_env().await;
//! let transport = SqsTransport::new(
//!     clients.sqs.clone(),
//!     clients.sts.clone(),
//!     PlatformEnvironment::from_env(),
//! );
//! # let _ = transport;
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::InvocationType;

use super::{IdentityClient, InvokeClient, PublishClient, QueueClient};
use crate::error::BoxError;

/// Direct invocation through `aws-sdk-lambda`.
#[derive(Debug, Clone)]
pub struct LambdaClient {
    client: aws_sdk_lambda::Client,
}

impl LambdaClient {
    /// Wraps a pre-built SDK client.
    pub fn new(client: aws_sdk_lambda::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl InvokeClient for LambdaClient {
    async fn invoke_event(&self, function_name: &str, payload: Vec<u8>) -> Result<i32, BoxError> {
        let output = self
            .client
            .invoke()
            .function_name(function_name)
            .invocation_type(InvocationType::Event)
            .payload(Blob::new(payload))
            .send()
            .await?;
        Ok(output.status_code())
    }
}

/// Topic publish through `aws-sdk-sns`.
#[derive(Debug, Clone)]
pub struct SnsClient {
    client: aws_sdk_sns::Client,
}

impl SnsClient {
    /// Wraps a pre-built SDK client.
    pub fn new(client: aws_sdk_sns::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PublishClient for SnsClient {
    async fn publish(&self, topic_arn: &str, message: String) -> Result<Option<String>, BoxError> {
        let output = self
            .client
            .publish()
            .topic_arn(topic_arn)
            .message(message)
            .send()
            .await?;
        Ok(output.message_id().map(str::to_string))
    }
}

/// Queue send through `aws-sdk-sqs`.
#[derive(Debug, Clone)]
pub struct SqsClient {
    client: aws_sdk_sqs::Client,
}

impl SqsClient {
    /// Wraps a pre-built SDK client.
    pub fn new(client: aws_sdk_sqs::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QueueClient for SqsClient {
    async fn send_message(
        &self,
        queue_url: &str,
        body: String,
        delay_seconds: u32,
    ) -> Result<Option<String>, BoxError> {
        let delay = i32::try_from(delay_seconds)?;
        let output = self
            .client
            .send_message()
            .queue_url(queue_url)
            .message_body(body)
            .delay_seconds(delay)
            .send()
            .await?;
        Ok(output.message_id().map(str::to_string))
    }
}

/// Account discovery through `aws-sdk-sts`.
#[derive(Debug, Clone)]
pub struct StsIdentity {
    client: aws_sdk_sts::Client,
}

impl StsIdentity {
    /// Wraps a pre-built SDK client.
    pub fn new(client: aws_sdk_sts::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IdentityClient for StsIdentity {
    async fn account_id(&self) -> Result<String, BoxError> {
        let output = self.client.get_caller_identity().send().await?;
        output
            .account()
            .map(str::to_string)
            .ok_or_else(|| "caller identity has no account".into())
    }
}

/// One client per platform service, sharing a single SDK configuration.
#[derive(Clone)]
pub struct AwsClients {
    /// Direct invocation client.
    pub lambda: Arc<LambdaClient>,
    /// Topic client.
    pub sns: Arc<SnsClient>,
    /// Queue client.
    pub sqs: Arc<SqsClient>,
    /// Account lookup client.
    pub sts: Arc<StsIdentity>,
}

impl std::fmt::Debug for AwsClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsClients").finish_non_exhaustive()
    }
}

impl AwsClients {
    /// Builds every client from a loaded SDK configuration.
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            lambda: Arc::new(LambdaClient::new(aws_sdk_lambda::Client::new(config))),
            sns: Arc::new(SnsClient::new(aws_sdk_sns::Client::new(config))),
            sqs: Arc::new(SqsClient::new(aws_sdk_sqs::Client::new(config))),
            sts: Arc::new(StsIdentity::new(aws_sdk_sts::Client::new(config))),
        }
    }

    /// Builds every client using the standard AWS SDK config chain.
    ///
    /// Loads credentials and region from environment variables, AWS
    /// profiles, or the platform's instance metadata.
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(&config)
    }
}
