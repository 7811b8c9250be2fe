//! Transport adapters for task messages.
//!
//! Three interchangeable ways to hand a [`TaskMessage`] back to the
//! platform:
//!
//! - [`LambdaTransport`] invokes the compute function directly, fire-and-forget.
//! - [`SnsTransport`] publishes on a topic the function is subscribed to.
//! - [`SqsTransport`] sends onto a queue with a native delivery delay, clamped
//!   to [`MAX_QUEUE_DELAY_SECS`].
//!
//! Each adapter talks to the platform through a narrow client trait
//! ([`InvokeClient`], [`PublishClient`], [`QueueClient`]). The AWS SDK
//! implementations live behind the `aws` feature; [`InMemoryBroker`]
//! implements all three for tests and local runs.
//!
//! Destinations are resolved lazily from the running function's name when
//! not configured explicitly, and cached for the lifetime of the adapter so
//! warm invocations skip the lookup.

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::{BoxError, DeliveryError};
use crate::task::message::{AsyncContext, TaskMessage};

mod lambda;
mod memory;
mod sns;
mod sqs;

#[cfg(feature = "aws")]
pub mod aws;

pub use lambda::LambdaTransport;
pub use memory::{InMemoryBroker, SentMessage, StaticAccount};
pub use sns::SnsTransport;
pub use sqs::SqsTransport;

/// Largest encoded message any transport accepts, in bytes.
pub const PAYLOAD_LIMIT: usize = 256_000;

/// Hard ceiling the queue enforces on `DelaySeconds`.
pub const MAX_QUEUE_DELAY_SECS: u32 = 900;

/// Identifies a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Direct asynchronous invocation of the compute function.
    Lambda,
    /// Topic publish.
    Sns,
    /// Queue send.
    Sqs,
}

impl TransportKind {
    /// Lowercase name used in settings and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lambda => "lambda",
            Self::Sns => "sns",
            Self::Sqs => "sqs",
        }
    }

    /// Whether the transport itself can hold a message back until it is due.
    pub fn has_native_delay(&self) -> bool {
        matches!(self, Self::Sqs)
    }

    /// Command under which messages sent through this transport are routed
    /// on receipt.
    pub fn route_command(&self) -> &'static str {
        match self {
            Self::Lambda => crate::task::ROUTE_LAMBDA_TASK,
            Self::Sns => crate::task::ROUTE_SNS_TASK,
            Self::Sqs => crate::task::ROUTE_SQS_TASK,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lambda" => Ok(Self::Lambda),
            "sns" => Ok(Self::Sns),
            "sqs" => Ok(Self::Sqs),
            other => Err(format!("unknown transport: {other}")),
        }
    }
}

/// Per-delivery options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryOptions {
    /// Requested delivery delay. Only the queue transport honours it.
    pub delay_seconds: u32,
}

impl DeliveryOptions {
    /// Options requesting a delivery delay.
    pub fn with_delay(delay_seconds: u32) -> Self {
        Self { delay_seconds }
    }
}

/// What a transport reports back after handing off a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Transport used.
    pub transport: TransportKind,
    /// Function name, topic ARN or queue URL the message went to.
    pub destination: String,
    /// Platform message id, when the transport returns one.
    pub message_id: Option<String>,
    /// Delay actually applied.
    pub delay_seconds: u32,
    /// `true` when the requested delay exceeded the transport's ceiling.
    pub clamped: bool,
}

/// One way of delivering a task message.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which transport this is.
    fn kind(&self) -> TransportKind;

    /// Longest native delivery delay, or `None` if delays are unsupported.
    fn max_delay(&self) -> Option<u32> {
        None
    }

    /// Fills the destination fields of `context` for messages sent through
    /// this transport.
    async fn describe(&self, context: &mut AsyncContext) -> Result<(), DeliveryError>;

    /// Hands `message` to the platform.
    async fn deliver(
        &self,
        message: &TaskMessage,
        options: &DeliveryOptions,
    ) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Fire-and-forget invocation of a compute function.
#[async_trait]
pub trait InvokeClient: Send + Sync {
    /// Invokes `function_name` asynchronously, returning the platform status code.
    async fn invoke_event(&self, function_name: &str, payload: Vec<u8>) -> Result<i32, BoxError>;
}

/// Topic publisher.
#[async_trait]
pub trait PublishClient: Send + Sync {
    /// Publishes `message` on `topic_arn`, returning the message id.
    async fn publish(&self, topic_arn: &str, message: String) -> Result<Option<String>, BoxError>;
}

/// Queue sender.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Sends `body` to `queue_url` with a delivery delay, returning the message id.
    async fn send_message(
        &self,
        queue_url: &str,
        body: String,
        delay_seconds: u32,
    ) -> Result<Option<String>, BoxError>;
}

/// Looks up the account that owns the running function.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Account id used to build topic ARNs and queue URLs.
    async fn account_id(&self) -> Result<String, BoxError>;
}

/// Name of the topic or queue paired with a compute function.
pub fn async_resource_name(function_name: &str) -> String {
    format!("{function_name}-async")
}

/// Topic ARN paired with `function_name`.
pub fn topic_arn(region: &str, account_id: &str, function_name: &str) -> String {
    format!(
        "arn:aws:sns:{region}:{account_id}:{}",
        async_resource_name(function_name)
    )
}

/// Queue URL paired with `function_name`.
pub fn queue_url(region: &str, account_id: &str, function_name: &str) -> String {
    format!(
        "https://sqs.{region}.amazonaws.com/{account_id}/{}",
        async_resource_name(function_name)
    )
}

/// Builds the paired topic ARN or queue URL for the running function.
pub(crate) async fn resolve_async_destination(
    environment: &crate::environment::PlatformEnvironment,
    identity: &dyn IdentityClient,
    transport: TransportKind,
    build: fn(&str, &str, &str) -> String,
) -> Result<String, DeliveryError> {
    let function_name = environment.function_name.as_deref().ok_or_else(|| {
        DeliveryError::Destination(format!(
            "{transport} destination not configured and not running on the platform"
        ))
    })?;
    let region = environment.region.as_deref().ok_or_else(|| {
        DeliveryError::Destination(format!("{transport} destination needs a region"))
    })?;
    let account_id = identity
        .account_id()
        .await
        .map_err(|e| DeliveryError::client(transport, e))?;
    Ok(build(region, &account_id, function_name))
}

/// Rejects encoded messages over [`PAYLOAD_LIMIT`].
pub(crate) fn check_payload(payload: &[u8]) -> Result<(), DeliveryError> {
    if payload.len() > PAYLOAD_LIMIT {
        return Err(DeliveryError::PayloadTooLarge {
            limit: PAYLOAD_LIMIT,
            actual: payload.len(),
        });
    }
    Ok(())
}

/// Encodes `message` for a text transport and checks its size.
pub(crate) fn encode_text(message: &TaskMessage) -> Result<String, DeliveryError> {
    let body = message
        .encode_string()
        .map_err(|e| DeliveryError::Encoding(e.to_string()))?;
    check_payload(body.as_bytes())?;
    Ok(body)
}

/// A destination that is either configured or resolved once on first use.
#[derive(Debug, Default)]
pub(crate) struct LazyDestination {
    resolved: OnceCell<String>,
}

impl LazyDestination {
    /// Destination known up front.
    pub(crate) fn explicit(destination: Option<String>) -> Self {
        let resolved = OnceCell::new();
        if let Some(destination) = destination {
            let _ = resolved.set(destination);
        }
        Self { resolved }
    }

    /// Returns the destination, running `resolve` the first time only.
    pub(crate) async fn get_or_resolve<F, Fut>(&self, resolve: F) -> Result<&str, DeliveryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, DeliveryError>>,
    {
        self.resolved
            .get_or_try_init(resolve)
            .await
            .map(String::as_str)
    }
}
