//! Queue send transport.

use std::sync::Arc;

use async_trait::async_trait;

use super::{
    encode_text, queue_url, resolve_async_destination, DeliveryOptions, DeliveryReceipt,
    IdentityClient, LazyDestination, QueueClient, Transport, TransportKind, MAX_QUEUE_DELAY_SECS,
};
use crate::environment::PlatformEnvironment;
use crate::error::DeliveryError;
use crate::task::message::{AsyncContext, TaskMessage};

/// Sends task messages onto the function's queue with a native delay.
///
/// Requested delays above [`MAX_QUEUE_DELAY_SECS`] are clamped. The clamp is
/// reported on the [`DeliveryReceipt`] so the caller can tell a partial delay
/// from a full one.
pub struct SqsTransport {
    client: Arc<dyn QueueClient>,
    identity: Arc<dyn IdentityClient>,
    environment: PlatformEnvironment,
    queue: LazyDestination,
}

impl std::fmt::Debug for SqsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqsTransport")
            .field("environment", &self.environment)
            .field("queue", &self.queue)
            .finish()
    }
}

impl SqsTransport {
    /// Transport resolving
    /// `https://sqs.{region}.amazonaws.com/{account}/{function}-async` on
    /// first use.
    pub fn new(
        client: Arc<dyn QueueClient>,
        identity: Arc<dyn IdentityClient>,
        environment: PlatformEnvironment,
    ) -> Self {
        Self {
            client,
            identity,
            environment,
            queue: LazyDestination::default(),
        }
    }

    /// Sends to an explicit queue instead.
    pub fn with_queue_url(mut self, queue_url: Option<String>) -> Self {
        self.queue = LazyDestination::explicit(queue_url);
        self
    }

    async fn destination(&self) -> Result<&str, DeliveryError> {
        self.queue
            .get_or_resolve(|| {
                resolve_async_destination(
                    &self.environment,
                    self.identity.as_ref(),
                    TransportKind::Sqs,
                    queue_url,
                )
            })
            .await
    }
}

#[async_trait]
impl Transport for SqsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sqs
    }

    fn max_delay(&self) -> Option<u32> {
        Some(MAX_QUEUE_DELAY_SECS)
    }

    async fn describe(&self, context: &mut AsyncContext) -> Result<(), DeliveryError> {
        context.queue_url = Some(self.destination().await?.to_string());
        context.region = self.environment.region.clone();
        Ok(())
    }

    async fn deliver(
        &self,
        message: &TaskMessage,
        options: &DeliveryOptions,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let queue_url = self.destination().await?;
        let body = encode_text(message)?;

        let clamped = options.delay_seconds > MAX_QUEUE_DELAY_SECS;
        let delay_seconds = options.delay_seconds.min(MAX_QUEUE_DELAY_SECS);
        if clamped {
            tracing::info!(
                task_path = %message.task_path,
                requested = options.delay_seconds,
                applied = delay_seconds,
                "queue delay clamped"
            );
        }

        let message_id = self
            .client
            .send_message(queue_url, body, delay_seconds)
            .await
            .map_err(|e| DeliveryError::client(TransportKind::Sqs, e))?;
        let Some(message_id) = message_id else {
            return Err(DeliveryError::Rejected {
                transport: TransportKind::Sqs,
                detail: "send returned no message id".to_string(),
            });
        };

        tracing::debug!(
            task_path = %message.task_path,
            queue_url,
            %message_id,
            delay_seconds,
            "task queued"
        );
        Ok(DeliveryReceipt {
            transport: TransportKind::Sqs,
            destination: queue_url.to_string(),
            message_id: Some(message_id),
            delay_seconds,
            clamped,
        })
    }
}
