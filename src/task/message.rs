//! Task message codec.
//!
//! A [`TaskMessage`] is a deferred function call. On the wire it is a JSON
//! object carrying the call plus a `command` naming the receipt router for
//! the transport it travelled on, so that the message re-enters the
//! classifier as an ordinary direct-command event:
//!
//! ```json
//! {
//!   "command": "hapline.route_sqs_task",
//!   "task_path": "shop.mail.send_receipt",
//!   "args": [42],
//!   "kwargs": {"resend": false},
//!   "capture_response": true,
//!   "response_id": "6f1c...",
//!   "async_context": {
//!     "transport": "sqs",
//!     "queue_url": "https://sqs.us-east-1.amazonaws.com/123456789012/shop-prod-async",
//!     "region": "us-east-1",
//!     "execute_datetime": "2026-10-16T12:00:00Z"
//!   }
//! }
//! ```
//!
//! Decoding ignores unknown fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::registry::split_task_path;
use crate::task::transport::TransportKind;

/// Transport metadata travelling with a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncContext {
    /// Transport the message was sent through.
    pub transport: TransportKind,

    /// Target function for direct invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,

    /// Topic the message was published on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_arn: Option<String>,

    /// Queue the message was sent to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_url: Option<String>,

    /// Region of the destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// When the target function should run.
    pub execute_datetime: DateTime<Utc>,
}

impl AsyncContext {
    /// Context for `transport` due at `execute_datetime`, with no destination yet.
    pub fn new(transport: TransportKind, execute_datetime: DateTime<Utc>) -> Self {
        Self {
            transport,
            function_name: None,
            topic_arn: None,
            queue_url: None,
            region: None,
            execute_datetime,
        }
    }
}

/// A deferred function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    /// `module.function` path of the target.
    pub task_path: String,

    /// Positional arguments.
    pub args: Vec<Value>,

    /// Keyword arguments.
    pub kwargs: Map<String, Value>,

    /// Whether the result must be written to the response store.
    #[serde(default)]
    pub capture_response: bool,

    /// Response store key, present when `capture_response` is set.
    #[serde(default)]
    pub response_id: Option<String>,

    /// Transport metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub async_context: Option<AsyncContext>,
}

#[derive(Serialize)]
struct Envelope<'a> {
    command: &'static str,
    #[serde(flatten)]
    message: &'a TaskMessage,
}

impl TaskMessage {
    /// A message for `task_path` without response capture or transport metadata.
    pub fn new(task_path: impl Into<String>, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self {
            task_path: task_path.into(),
            args,
            kwargs,
            capture_response: false,
            response_id: None,
            async_context: None,
        }
    }

    /// Transport the message targets; direct invocation when unset.
    pub fn transport(&self) -> TransportKind {
        self.async_context
            .as_ref()
            .map_or(TransportKind::Lambda, |ctx| ctx.transport)
    }

    /// Serializes the message into its JSON envelope.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let envelope = Envelope {
            command: self.transport().route_command(),
            message: self,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Encodes to a UTF-8 string for text-only transports.
    pub fn encode_string(&self) -> Result<String> {
        let bytes = self.encode()?;
        String::from_utf8(bytes).map_err(|e| Error::MalformedMessage(e.to_string()))
    }

    /// Decodes an envelope.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedMessage`] when the bytes are not JSON, a required
    /// field (`task_path`, `args`, `kwargs`) is missing, the path does not
    /// split into module and function, or capture is requested without a
    /// response id.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| Error::MalformedMessage(e.to_string()))?;
        Self::from_value(&value)
    }

    /// Decodes an already-parsed envelope.
    pub fn from_value(value: &Value) -> Result<Self> {
        let message =
            Self::deserialize(value).map_err(|e| Error::MalformedMessage(e.to_string()))?;
        split_task_path(&message.task_path).map_err(|_| {
            Error::MalformedMessage(format!(
                "task_path {:?} does not name a module and a function",
                message.task_path
            ))
        })?;
        if message.capture_response && message.response_id.is_none() {
            return Err(Error::MalformedMessage(
                "capture_response is set without a response_id".to_string(),
            ));
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample() -> TaskMessage {
        let mut kwargs = Map::new();
        kwargs.insert("resend".to_string(), json!(false));
        let mut message = TaskMessage::new("shop.mail.send_receipt", vec![json!(42)], kwargs);
        message.capture_response = true;
        message.response_id = Some("r-1".to_string());
        let mut ctx = AsyncContext::new(
            TransportKind::Sqs,
            Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap(),
        );
        ctx.queue_url = Some("https://sqs.example/q".to_string());
        message.async_context = Some(ctx);
        message
    }

    #[test]
    fn envelope_names_receipt_router() {
        let bytes = sample().encode().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["command"], "hapline.route_sqs_task");
        assert_eq!(value["task_path"], "shop.mail.send_receipt");
        assert_eq!(value["async_context"]["execute_datetime"], "2026-10-16T12:00:00Z");
        assert!(value["async_context"].get("topic_arn").is_none());
    }

    #[test]
    fn decode_restores_message() {
        let message = sample();
        let decoded = TaskMessage::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn decode_tolerates_unknown_fields() {
        let value = json!({
            "task_path": "app.tasks.add",
            "args": [1, 2],
            "kwargs": {},
            "future_field": {"nested": true},
        });
        let message = TaskMessage::from_value(&value).unwrap();
        assert_eq!(message.args, vec![json!(1), json!(2)]);
        assert!(!message.capture_response);
        assert_eq!(message.transport(), TransportKind::Lambda);
    }

    #[test]
    fn decode_rejects_missing_fields() {
        let err = TaskMessage::from_value(&json!({"task_path": "app.tasks.add"})).unwrap_err();
        assert!(matches!(err, Error::MalformedMessage(_)));
    }

    #[test]
    fn decode_rejects_unsplittable_path() {
        let err = TaskMessage::from_value(&json!({"task_path": "add", "args": [], "kwargs": {}}))
            .unwrap_err();
        assert!(matches!(err, Error::MalformedMessage(_)));
    }

    #[test]
    fn decode_rejects_capture_without_id() {
        let err = TaskMessage::from_value(&json!({
            "task_path": "app.tasks.add",
            "args": [],
            "kwargs": {},
            "capture_response": true,
        }))
        .unwrap_err();
        assert!(matches!(err, Error::MalformedMessage(_)));
    }

    #[test]
    fn decode_rejects_non_json() {
        assert!(matches!(
            TaskMessage::decode(b"not json").unwrap_err(),
            Error::MalformedMessage(_)
        ));
    }
}
