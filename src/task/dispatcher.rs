//! Async dispatcher.
//!
//! [`AsyncDispatcher`] decides, per call, whether a task runs inline or is
//! handed to a transport. A call goes asynchronous only when the process is
//! running on the platform **and** a transport of the selected kind is
//! configured; everywhere else the target runs inline and its result is
//! returned directly, so code written against the dispatcher runs unchanged
//! in tests.
//!
//! The dispatcher is built once per process and reused across warm
//! invocations. Transports cache their resolved destinations, so only the
//! first send pays for the lookup.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::message::{AsyncContext, TaskMessage};
use super::schedule;
use super::transport::{DeliveryOptions, DeliveryReceipt, Transport, TransportKind};
use crate::environment::PlatformEnvironment;
use crate::error::{DeliveryError, Result};
use crate::registry::{split_task_path, FunctionRegistry};
use crate::settings::Settings;

/// Outcome of [`TaskHandle::enqueue`].
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// The message was handed to a transport.
    Sent {
        /// What the transport reported.
        receipt: DeliveryReceipt,
        /// Response store key, when the result is being captured.
        response_id: Option<String>,
    },
    /// The target ran in this process and returned this value.
    Inline(Value),
}

impl Dispatch {
    /// Response store key of a sent, captured task.
    pub fn response_id(&self) -> Option<&str> {
        match self {
            Self::Sent { response_id, .. } => response_id.as_deref(),
            Self::Inline(_) => None,
        }
    }
}

/// Sends task messages through configured transports.
pub struct AsyncDispatcher {
    environment: PlatformEnvironment,
    registry: Arc<FunctionRegistry>,
    transports: HashMap<TransportKind, Arc<dyn Transport>>,
    default_transport: TransportKind,
    capture_enabled: bool,
}

impl fmt::Debug for AsyncDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.transports.keys().map(TransportKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("AsyncDispatcher")
            .field("environment", &self.environment)
            .field("transports", &kinds)
            .field("default_transport", &self.default_transport)
            .field("capture_enabled", &self.capture_enabled)
            .finish()
    }
}

impl AsyncDispatcher {
    /// Dispatcher with no transports; every call runs inline until one is added.
    pub fn new(environment: PlatformEnvironment, registry: Arc<FunctionRegistry>) -> Self {
        Self {
            environment,
            registry,
            transports: HashMap::new(),
            default_transport: TransportKind::Lambda,
            capture_enabled: false,
        }
    }

    /// Applies the default transport and response capture from `settings`.
    pub fn configured(mut self, settings: &Settings) -> Self {
        self.default_transport = settings.async_transport;
        self.capture_enabled = settings.async_response_table.is_some();
        self
    }

    /// Registers `transport`, replacing any previous one of the same kind.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.insert(transport.kind(), transport);
        self
    }

    /// Transport used when a call does not pick one.
    pub fn with_default_transport(mut self, kind: TransportKind) -> Self {
        self.default_transport = kind;
        self
    }

    /// Enables result capture; requires a response store on the receiving side.
    pub fn with_response_capture(mut self, enabled: bool) -> Self {
        self.capture_enabled = enabled;
        self
    }

    /// Platform the dispatcher runs on.
    pub fn environment(&self) -> &PlatformEnvironment {
        &self.environment
    }

    /// Registry used for inline execution.
    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    /// Configured transport of `kind`.
    pub fn transport(&self, kind: TransportKind) -> Option<&Arc<dyn Transport>> {
        self.transports.get(&kind)
    }

    /// Whether a call through `kind` would leave the process.
    pub fn is_async(&self, kind: TransportKind) -> bool {
        self.environment.is_on_platform() && self.transports.contains_key(&kind)
    }

    /// Handle for calling or enqueueing the function registered at `task_path`.
    pub fn task(&self, task_path: impl Into<String>) -> TaskHandle<'_> {
        TaskHandle {
            dispatcher: self,
            task_path: task_path.into(),
            transport: None,
            capture_response: false,
            execute_at: None,
        }
    }

    /// Sends `message` again through the transport it came from, keeping its
    /// `execute_datetime`.
    pub async fn requeue(
        &self,
        message: &TaskMessage,
        delay_seconds: u32,
    ) -> std::result::Result<DeliveryReceipt, DeliveryError> {
        let kind = message.transport();
        let transport = self
            .transports
            .get(&kind)
            .ok_or(DeliveryError::NotConfigured(kind))?;

        let mut next = message.clone();
        let execute_at = message
            .async_context
            .as_ref()
            .map_or_else(Utc::now, |ctx| ctx.execute_datetime);
        let mut context = AsyncContext::new(kind, execute_at);
        transport.describe(&mut context).await?;
        next.async_context = Some(context);

        let receipt = transport
            .deliver(&next, &DeliveryOptions::with_delay(delay_seconds))
            .await?;
        tracing::info!(
            task_path = %message.task_path,
            transport = %kind,
            delay_seconds = receipt.delay_seconds,
            %execute_at,
            "task requeued"
        );
        Ok(receipt)
    }

    async fn send(
        &self,
        transport: &dyn Transport,
        task_path: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        capture_response: bool,
        execute_at: DateTime<Utc>,
    ) -> Result<Dispatch> {
        let capture_response = if capture_response && !self.capture_enabled {
            tracing::warn!(
                task_path,
                "response capture requested without an async response table; sending without capture"
            );
            false
        } else {
            capture_response
        };

        let kind = transport.kind();
        let mut context = AsyncContext::new(kind, execute_at);
        transport.describe(&mut context).await?;

        let mut message = TaskMessage::new(task_path, args, kwargs);
        message.async_context = Some(context);
        if capture_response {
            message.capture_response = true;
            message.response_id = Some(Uuid::new_v4().to_string());
        }

        let delay_seconds = schedule::initial_delay(execute_at, Utc::now());
        let receipt = transport
            .deliver(&message, &DeliveryOptions::with_delay(delay_seconds))
            .await?;
        if receipt.clamped {
            tracing::info!(
                task_path,
                transport = %kind,
                requested = delay_seconds,
                applied = receipt.delay_seconds,
                "task due beyond the transport ceiling; it will be requeued on receipt"
            );
        }
        tracing::debug!(
            task_path,
            transport = %kind,
            response_id = message.response_id.as_deref(),
            "task sent"
        );

        Ok(Dispatch::Sent {
            receipt,
            response_id: message.response_id,
        })
    }
}

/// A function reachable through the dispatcher.
///
/// [`call`](Self::call) always runs inline. [`enqueue`](Self::enqueue) sends
/// the call through a transport when running on the platform, and runs it
/// inline otherwise.
#[derive(Debug)]
pub struct TaskHandle<'a> {
    dispatcher: &'a AsyncDispatcher,
    task_path: String,
    transport: Option<TransportKind>,
    capture_response: bool,
    execute_at: Option<DateTime<Utc>>,
}

impl TaskHandle<'_> {
    /// Uses `kind` instead of the dispatcher's default transport.
    pub fn via(mut self, kind: TransportKind) -> Self {
        self.transport = Some(kind);
        self
    }

    /// Persists the result in the response store.
    pub fn capture_response(mut self) -> Self {
        self.capture_response = true;
        self
    }

    /// Runs the task at `execute_at` instead of now.
    pub fn at(mut self, execute_at: DateTime<Utc>) -> Self {
        self.execute_at = Some(execute_at);
        self
    }

    /// Runs the task after `delay`.
    pub fn after(self, delay: chrono::Duration) -> Self {
        self.at(Utc::now() + delay)
    }

    /// Path of the target.
    pub fn task_path(&self) -> &str {
        &self.task_path
    }

    /// Runs the target in this process.
    pub async fn call(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Value> {
        self.dispatcher
            .registry
            .run_task(&self.task_path, args, kwargs)
            .await
    }

    /// Sends the call through a transport, or runs it inline off the platform.
    ///
    /// # Errors
    ///
    /// [`Error::Delivery`](crate::Error::Delivery) when the transport fails
    /// to take the message; delivery failures are never swallowed.
    pub async fn enqueue(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Dispatch> {
        split_task_path(&self.task_path)?;
        let kind = self.transport.unwrap_or(self.dispatcher.default_transport);

        let transport = match self.dispatcher.transports.get(&kind) {
            Some(transport) if self.dispatcher.environment.is_on_platform() => transport,
            _ => {
                tracing::debug!(task_path = %self.task_path, transport = %kind, "running task inline");
                return self.call(args, kwargs).await.map(Dispatch::Inline);
            },
        };

        self.dispatcher
            .send(
                transport.as_ref(),
                &self.task_path,
                args,
                kwargs,
                self.capture_response,
                self.execute_at.unwrap_or_else(Utc::now),
            )
            .await
    }
}

#[cfg(feature = "aws")]
impl AsyncDispatcher {
    /// Dispatcher with all three AWS transports, configured from `settings`.
    pub fn from_aws(
        settings: &Settings,
        environment: PlatformEnvironment,
        registry: Arc<FunctionRegistry>,
        clients: &super::transport::aws::AwsClients,
    ) -> Self {
        use super::transport::{LambdaTransport, SnsTransport, SqsTransport};

        let lambda = LambdaTransport::new(clients.lambda.clone(), environment.clone());
        let sns = SnsTransport::new(clients.sns.clone(), clients.sts.clone(), environment.clone())
            .with_topic_arn(settings.async_topic_arn.clone());
        let sqs = SqsTransport::new(clients.sqs.clone(), clients.sts.clone(), environment.clone())
            .with_queue_url(settings.async_queue_url.clone());

        Self::new(environment, registry)
            .configured(settings)
            .with_transport(Arc::new(lambda))
            .with_transport(Arc::new(sns))
            .with_transport(Arc::new(sqs))
    }
}
