//! Topic publish transport.

use std::sync::Arc;

use async_trait::async_trait;

use super::{
    encode_text, resolve_async_destination, topic_arn, DeliveryOptions, DeliveryReceipt,
    IdentityClient, LazyDestination, PublishClient, Transport, TransportKind,
};
use crate::environment::PlatformEnvironment;
use crate::error::DeliveryError;
use crate::task::message::{AsyncContext, TaskMessage};

/// Publishes task messages on the topic the function is subscribed to.
pub struct SnsTransport {
    client: Arc<dyn PublishClient>,
    identity: Arc<dyn IdentityClient>,
    environment: PlatformEnvironment,
    topic: LazyDestination,
}

impl std::fmt::Debug for SnsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnsTransport")
            .field("environment", &self.environment)
            .field("topic", &self.topic)
            .finish()
    }
}

impl SnsTransport {
    /// Transport resolving `arn:aws:sns:{region}:{account}:{function}-async`
    /// on first use.
    pub fn new(
        client: Arc<dyn PublishClient>,
        identity: Arc<dyn IdentityClient>,
        environment: PlatformEnvironment,
    ) -> Self {
        Self {
            client,
            identity,
            environment,
            topic: LazyDestination::default(),
        }
    }

    /// Publishes on an explicit topic instead.
    pub fn with_topic_arn(mut self, topic_arn: Option<String>) -> Self {
        self.topic = LazyDestination::explicit(topic_arn);
        self
    }

    async fn destination(&self) -> Result<&str, DeliveryError> {
        self.topic
            .get_or_resolve(|| {
                resolve_async_destination(
                    &self.environment,
                    self.identity.as_ref(),
                    TransportKind::Sns,
                    topic_arn,
                )
            })
            .await
    }
}

#[async_trait]
impl Transport for SnsTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sns
    }

    async fn describe(&self, context: &mut AsyncContext) -> Result<(), DeliveryError> {
        context.topic_arn = Some(self.destination().await?.to_string());
        context.region = self.environment.region.clone();
        Ok(())
    }

    async fn deliver(
        &self,
        message: &TaskMessage,
        options: &DeliveryOptions,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let topic_arn = self.destination().await?;
        let body = encode_text(message)?;

        if options.delay_seconds > 0 {
            tracing::warn!(
                task_path = %message.task_path,
                delay_seconds = options.delay_seconds,
                "topic publish has no native delay; delivering immediately"
            );
        }

        let message_id = self
            .client
            .publish(topic_arn, body)
            .await
            .map_err(|e| DeliveryError::client(TransportKind::Sns, e))?;
        let Some(message_id) = message_id else {
            return Err(DeliveryError::Rejected {
                transport: TransportKind::Sns,
                detail: "publish returned no message id".to_string(),
            });
        };

        tracing::debug!(task_path = %message.task_path, topic_arn, %message_id, "task published");
        Ok(DeliveryReceipt {
            transport: TransportKind::Sns,
            destination: topic_arn.to_string(),
            message_id: Some(message_id),
            delay_seconds: 0,
            clamped: false,
        })
    }
}
