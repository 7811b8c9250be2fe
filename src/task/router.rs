//! Receipt routers.
//!
//! A task message re-enters the process as an event whose `command` names
//! one of the routers here. The router decodes the message, re-sends it if
//! it is not due yet, and otherwise runs the target, recording the result
//! in the response store when capture was requested. A queue message that
//! is not due yet and has no dispatcher to requeue it fails with
//! [`DeliveryError::NotConfigured`] instead of running early.
//!
//! Delivery is at-least-once: a message the transport hands over twice runs
//! twice. Targets must tolerate duplicate execution.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use super::dispatcher::AsyncDispatcher;
use super::message::TaskMessage;
use super::schedule::{self, ReceiptAction};
use super::{ROUTE_LAMBDA_TASK, ROUTE_SNS_TASK, ROUTE_SQS_TASK};
use crate::error::{DeliveryError, Error, Result};
use crate::registry::FunctionRegistry;
use crate::store::ResponseStore;

/// Runs task messages that arrived through a transport.
#[derive(Clone)]
pub struct TaskRouter {
    registry: Arc<FunctionRegistry>,
    dispatcher: Option<Arc<AsyncDispatcher>>,
    store: Option<Arc<dyn ResponseStore>>,
}

impl fmt::Debug for TaskRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRouter")
            .field("registry", &self.registry)
            .field("dispatcher", &self.dispatcher)
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl TaskRouter {
    /// Router running targets from `registry`, without requeue or capture.
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self {
            registry,
            dispatcher: None,
            store: None,
        }
    }

    /// Re-sends messages that are not due yet through `dispatcher`.
    pub fn with_dispatcher(mut self, dispatcher: Arc<AsyncDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Records captured results in `store`.
    pub fn with_response_store(mut self, store: Arc<dyn ResponseStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Runs the router named by `command`, or returns `None` when `command`
    /// is not a receipt router.
    pub async fn route(&self, command: &str, event: &Value) -> Option<Result<Value>> {
        let result = match command {
            ROUTE_LAMBDA_TASK => self.route_lambda_task(event).await,
            ROUTE_SNS_TASK => self.route_sns_task(event).await,
            ROUTE_SQS_TASK => self.route_sqs_task(event).await,
            _ => return None,
        };
        Some(result)
    }

    /// The event is the message envelope itself.
    pub async fn route_lambda_task(&self, event: &Value) -> Result<Value> {
        let message = TaskMessage::from_value(event)?;
        self.receive(message).await
    }

    /// The message is the first record's notification body.
    pub async fn route_sns_task(&self, event: &Value) -> Result<Value> {
        let body = event
            .pointer("/Records/0/Sns/Message")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::MalformedMessage("topic event carries no Records[0].Sns.Message".to_string())
            })?;
        let message = TaskMessage::decode(body.as_bytes())?;
        self.receive(message).await
    }

    /// Every record of the batch carries one message. Results are returned
    /// in record order.
    ///
    /// The first failing record fails the whole batch, so the platform
    /// redelivers all of it.
    pub async fn route_sqs_task(&self, event: &Value) -> Result<Value> {
        let records = event
            .get("Records")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::MalformedMessage("queue event carries no Records".to_string()))?;

        let mut results = Vec::with_capacity(records.len());
        for record in records {
            let body = record.get("body").and_then(Value::as_str).ok_or_else(|| {
                Error::MalformedMessage("queue record carries no body".to_string())
            })?;
            let message = TaskMessage::decode(body.as_bytes())?;
            results.push(self.receive(message).await?);
        }
        Ok(Value::Array(results))
    }

    async fn receive(&self, message: TaskMessage) -> Result<Value> {
        let Some(context) = message.async_context.as_ref() else {
            return self.run_message(message).await;
        };
        let (kind, execute_at) = (context.transport, context.execute_datetime);
        let now = Utc::now();

        let requeue_via = self
            .dispatcher
            .as_ref()
            .and_then(|dispatcher| Some((dispatcher, dispatcher.transport(kind)?.max_delay()?)));
        let Some((dispatcher, max_delay)) = requeue_via else {
            if kind.has_native_delay() && schedule::remaining_seconds(execute_at, now) > 0 {
                tracing::warn!(
                    task_path = %message.task_path,
                    execute_datetime = %execute_at,
                    transport = %kind,
                    "task not due yet and no dispatcher can requeue it"
                );
                return Err(DeliveryError::NotConfigured(kind).into());
            }
            return self.run_message(message).await;
        };

        match schedule::on_receipt(execute_at, now, Some(max_delay)) {
            ReceiptAction::Execute => self.run_message(message).await,
            ReceiptAction::Requeue { delay_seconds } => {
                dispatcher.requeue(&message, delay_seconds).await?;
                Ok(Value::Null)
            },
        }
    }

    /// Runs the target of `message`, bracketing it with response store
    /// writes when capture is requested.
    pub async fn run_message(&self, message: TaskMessage) -> Result<Value> {
        let capture = match (message.capture_response, message.response_id.as_deref()) {
            (true, Some(id)) => match self.store.as_ref() {
                Some(store) => Some((store, id.to_string())),
                None => {
                    tracing::warn!(
                        task_path = %message.task_path,
                        response_id = id,
                        "response capture requested but no response store configured"
                    );
                    None
                },
            },
            _ => None,
        };

        if let Some((store, id)) = &capture {
            store.mark_in_progress(id).await?;
        }

        let response = self
            .registry
            .run_task(&message.task_path, message.args, message.kwargs)
            .await?;

        if let Some((store, id)) = &capture {
            store.complete(id, response.clone()).await?;
            tracing::debug!(task_path = %message.task_path, response_id = %id, "response captured");
        }

        Ok(response)
    }
}
