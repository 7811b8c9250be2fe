//! Direct invocation transport.

use std::sync::Arc;

use async_trait::async_trait;

use super::{
    check_payload, DeliveryOptions, DeliveryReceipt, InvokeClient, LazyDestination, Transport,
    TransportKind,
};
use crate::environment::PlatformEnvironment;
use crate::error::DeliveryError;
use crate::task::message::{AsyncContext, TaskMessage};

/// Status the platform answers with once an event invocation is queued.
const ACCEPTED: i32 = 202;

/// Invokes the compute function directly with the encoded message.
///
/// The invocation is fire-and-forget: the caller is never blocked on the
/// target and no return value is consumed. A message counts as sent only
/// when the platform answers `202 Accepted`.
pub struct LambdaTransport {
    client: Arc<dyn InvokeClient>,
    environment: PlatformEnvironment,
    function_name: LazyDestination,
}

impl std::fmt::Debug for LambdaTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LambdaTransport")
            .field("environment", &self.environment)
            .field("function_name", &self.function_name)
            .finish()
    }
}

impl LambdaTransport {
    /// Transport targeting the running function.
    pub fn new(client: Arc<dyn InvokeClient>, environment: PlatformEnvironment) -> Self {
        Self {
            client,
            environment,
            function_name: LazyDestination::default(),
        }
    }

    /// Targets another function instead of the running one.
    pub fn with_function_name(mut self, function_name: impl Into<String>) -> Self {
        self.function_name = LazyDestination::explicit(Some(function_name.into()));
        self
    }

    async fn destination(&self) -> Result<&str, DeliveryError> {
        self.function_name
            .get_or_resolve(|| async {
                self.environment.function_name.clone().ok_or_else(|| {
                    DeliveryError::Destination(
                        "no function name configured and not running on the platform".to_string(),
                    )
                })
            })
            .await
    }
}

#[async_trait]
impl Transport for LambdaTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Lambda
    }

    async fn describe(&self, context: &mut AsyncContext) -> Result<(), DeliveryError> {
        context.function_name = Some(self.destination().await?.to_string());
        context.region = self.environment.region.clone();
        Ok(())
    }

    async fn deliver(
        &self,
        message: &TaskMessage,
        options: &DeliveryOptions,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let function_name = self.destination().await?;
        let payload = message
            .encode()
            .map_err(|e| DeliveryError::Encoding(e.to_string()))?;
        check_payload(&payload)?;

        if options.delay_seconds > 0 {
            tracing::warn!(
                task_path = %message.task_path,
                delay_seconds = options.delay_seconds,
                "direct invocation has no native delay; delivering immediately"
            );
        }

        let status = self
            .client
            .invoke_event(function_name, payload)
            .await
            .map_err(|e| DeliveryError::client(TransportKind::Lambda, e))?;
        if status != ACCEPTED {
            return Err(DeliveryError::Rejected {
                transport: TransportKind::Lambda,
                detail: format!("invoke returned status {status}"),
            });
        }

        tracing::debug!(task_path = %message.task_path, function_name, "task invoked");
        Ok(DeliveryReceipt {
            transport: TransportKind::Lambda,
            destination: function_name.to_string(),
            message_id: None,
            delay_seconds: 0,
            clamped: false,
        })
    }
}
