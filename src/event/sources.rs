//! Event-source records to target functions.
//!
//! A records batch is routed by its first record. The record names its
//! target directly in two cases: an object-store notification whose
//! configuration id ends in `:<function path>`, and a topic or queue
//! message whose JSON body carries a `command`. Otherwise the originating
//! ARN is looked up in the event-source mapping.

use std::collections::HashMap;

use serde_json::Value;

/// Where a record should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordTarget {
    /// A function path, from the record itself or the mapping.
    Function(String),
    /// A direct command carried in a message body.
    Command(String),
    /// Nothing configured for the record's source.
    Unresolved {
        /// ARN of the source, when the record names one.
        source_id: Option<String>,
    },
}

/// Service a record originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSource {
    /// Object-store notification.
    S3,
    /// Topic notification.
    Sns,
    /// Table stream.
    DynamoDb,
    /// Data stream.
    Kinesis,
    /// Queue message.
    Sqs,
    /// Anything else.
    Unknown,
}

impl RecordSource {
    /// Identifies the service that produced `record`.
    pub fn of(record: &Value) -> Self {
        if record.get("Sns").is_some() {
            Self::Sns
        } else if record.get("dynamodb").is_some() {
            Self::DynamoDb
        } else if record.get("kinesis").is_some() {
            Self::Kinesis
        } else if record.get("eventSource").and_then(Value::as_str) == Some("aws:sqs") {
            Self::Sqs
        } else if record.get("s3").is_some() {
            Self::S3
        } else {
            Self::Unknown
        }
    }
}

/// Resolves the target of a records batch from its first `record`.
pub fn resolve_record(record: &Value, mapping: &HashMap<String, String>) -> RecordTarget {
    if let Some(path) = record
        .pointer("/s3/configurationId")
        .and_then(Value::as_str)
        .and_then(|id| id.rsplit_once(':'))
        .map(|(_, path)| path)
    {
        return RecordTarget::Function(path.to_string());
    }

    let source = RecordSource::of(record);
    let arn = match source {
        RecordSource::Sns => {
            let body = record.pointer("/Sns/Message").and_then(Value::as_str);
            if let Some(command) = body.and_then(embedded_command) {
                return RecordTarget::Command(command);
            }
            record.pointer("/Sns/TopicArn")
        },
        RecordSource::Sqs => {
            let body = record.get("body").and_then(Value::as_str);
            if let Some(command) = body.and_then(embedded_command) {
                return RecordTarget::Command(command);
            }
            record.get("eventSourceARN")
        },
        RecordSource::DynamoDb | RecordSource::Kinesis => record.get("eventSourceARN"),
        RecordSource::S3 => record.pointer("/s3/bucket/arn"),
        RecordSource::Unknown => None,
    };

    let arn = arn.and_then(Value::as_str);
    match arn.and_then(|arn| mapping.get(arn)) {
        Some(path) => RecordTarget::Function(path.clone()),
        None => RecordTarget::Unresolved {
            source_id: arn.map(str::to_string),
        },
    }
}

/// `command` of a JSON message body, if it has one.
fn embedded_command(body: &str) -> Option<String> {
    let message: Value = serde_json::from_str(body).ok()?;
    message
        .get("command")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}
