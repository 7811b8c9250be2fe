//! Error types for the invocation core.
//!
//! [`Error`] is the crate-wide error. Transport failures carry their own
//! [`DeliveryError`] so callers of [`TaskHandle::enqueue`](crate::task::TaskHandle::enqueue)
//! can match on the exact hand-off failure, and response store failures carry
//! a [`StoreError`](crate::store::StoreError).

use thiserror::Error;

use crate::store::StoreError;
use crate::task::transport::TransportKind;

/// Boxed error returned by application-supplied functions and applications.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the invocation core.
#[derive(Debug, Error)]
pub enum Error {
    /// A task message could not be decoded.
    #[error("malformed task message: {0}")]
    MalformedMessage(String),

    /// A transport failed to hand off a message.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// An HTTP event that cannot be turned into a request.
    #[error("invalid HTTP event: {0}")]
    InvalidEvent(String),

    /// Token authorizer event received without an authorizer function.
    ///
    /// The platform reads a failed invocation here as a deny decision.
    #[error("Unauthorized")]
    Unauthorized,

    /// The hosted application failed and the exception handler did not
    /// mark the failure as handled.
    #[error("hosted application error: {0}")]
    HostedApplication(#[source] BoxError),

    /// A records batch whose source has no configured function.
    #[error("no function mapped for event source {source_id}")]
    UnresolvedEventSource {
        /// ARN or identifier of the originating service.
        source_id: String,
    },

    /// No function is registered under the given path.
    #[error("no function registered for {0}")]
    FunctionNotFound(String),

    /// A path that does not split into a module and a function name.
    #[error("invalid task path {0:?}: expected `module.function`")]
    InvalidTaskPath(String),

    /// The target declares a signature that cannot receive `(event, context)`.
    #[error(
        "function signature of {path} is invalid: expected at most 2 parameters or variadic, found {params}"
    )]
    InvalidSignature {
        /// Path of the offending function.
        path: String,
        /// Number of fixed parameters it declares.
        params: usize,
    },

    /// A registered function returned an error.
    #[error("function {path} failed: {source}")]
    Function {
        /// Path of the function that failed.
        path: String,
        /// The function's own error.
        #[source]
        source: BoxError,
    },

    /// Response store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Failure to hand a task message to a transport.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The encoded message is larger than the transport accepts.
    #[error("payload of {actual} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge {
        /// Transport limit in bytes.
        limit: usize,
        /// Encoded message size in bytes.
        actual: usize,
    },

    /// The platform accepted the call but did not take the message.
    #[error("{transport} transport rejected the message: {detail}")]
    Rejected {
        /// Transport that rejected the message.
        transport: TransportKind,
        /// Platform-supplied detail (status code, missing id).
        detail: String,
    },

    /// The platform client failed (network error, timeout, throttling).
    #[error("{transport} transport failed: {message}")]
    Client {
        /// Transport whose client failed.
        transport: TransportKind,
        /// Human-readable description.
        message: String,
        /// Underlying client error.
        #[source]
        source: Option<BoxError>,
    },

    /// The message could not be serialized.
    #[error("cannot encode task message: {0}")]
    Encoding(String),

    /// The destination (function name, topic ARN, queue URL) is unknown.
    #[error("cannot resolve delivery destination: {0}")]
    Destination(String),

    /// No transport of this kind was configured on the dispatcher.
    #[error("transport {0} is not configured")]
    NotConfigured(TransportKind),
}

impl DeliveryError {
    /// Wraps a platform client error for `transport`.
    pub fn client(transport: TransportKind, err: impl Into<BoxError>) -> Self {
        let source = err.into();
        Self::Client {
            transport,
            message: source.to_string(),
            source: Some(source),
        }
    }
}

impl Error {
    /// Flattens the error and its sources into display strings, outermost first.
    ///
    /// Used as the `traceback` of debug-mode error responses.
    pub fn chain(&self) -> Vec<String> {
        error_chain(self)
    }
}

/// Flattens any error and its sources into display strings, outermost first.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> Vec<String> {
    let mut chain = vec![err.to_string()];
    let mut current = err.source();
    while let Some(source) = current {
        chain.push(source.to_string());
        current = source.source();
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_display_is_bare() {
        assert_eq!(Error::Unauthorized.to_string(), "Unauthorized");
    }

    #[test]
    fn delivery_error_converts_into_error() {
        let err: Error = DeliveryError::PayloadTooLarge {
            limit: 10,
            actual: 11,
        }
        .into();
        assert!(matches!(
            err,
            Error::Delivery(DeliveryError::PayloadTooLarge { .. })
        ));
        assert_eq!(err.to_string(), "payload of 11 bytes exceeds the 10 byte limit");
    }

    #[test]
    fn chain_walks_sources() {
        let inner: BoxError = "connection reset".into();
        let err = Error::Function {
            path: "app.jobs.sync".to_string(),
            source: inner,
        };
        let chain = err.chain();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1], "connection reset");
    }
}
