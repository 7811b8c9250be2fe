//! In-memory platform clients.
//!
//! [`InMemoryBroker`] records every invocation, publish and queue send it
//! receives instead of talking to the platform. It implements all three
//! client traits, so one broker can back every transport of a dispatcher in
//! tests and local runs.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use hapline::environment::PlatformEnvironment;
//! use hapline::task::transport::{InMemoryBroker, StaticAccount, SqsTransport};
//!
//! let broker = Arc::new(InMemoryBroker::new());
//! let transport = SqsTransport::new(
//!     broker.clone(),
//!     Arc::new(StaticAccount::new("123456789012")),
//!     PlatformEnvironment::on_platform("shop-prod", "us-east-1"),
//! );
//! assert!(broker.sent().is_empty());
//! # let _ = transport;
//! ```

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{IdentityClient, InvokeClient, PublishClient, QueueClient, TransportKind};
use crate::error::BoxError;

/// A message captured by [`InMemoryBroker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Transport the message went through.
    pub transport: TransportKind,
    /// Function name, topic ARN or queue URL.
    pub destination: String,
    /// Encoded message.
    pub body: String,
    /// Delivery delay requested from the queue; zero elsewhere.
    pub delay_seconds: u32,
}

/// Recording fake for the invoke, publish and queue clients.
#[derive(Debug)]
pub struct InMemoryBroker {
    sent: Mutex<Vec<SentMessage>>,
    failures: Mutex<Vec<String>>,
    invoke_status: i32,
    next_id: AtomicU64,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Creates an empty broker that accepts everything.
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            invoke_status: 202,
            next_id: AtomicU64::new(1),
        }
    }

    /// Answers direct invocations with `status` instead of 202.
    pub fn with_invoke_status(mut self, status: i32) -> Self {
        self.invoke_status = status;
        self
    }

    /// Makes the next client call fail with `message`.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.failures.lock().push(message.into());
    }

    /// Everything sent so far, oldest first.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    /// Removes and returns everything sent so far.
    pub fn drain(&self) -> Vec<SentMessage> {
        std::mem::take(&mut *self.sent.lock())
    }

    fn take_failure(&self) -> Result<(), BoxError> {
        let mut failures = self.failures.lock();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.remove(0).into())
        }
    }

    fn record(&self, message: SentMessage) -> String {
        self.sent.lock().push(message);
        format!("msg-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl InvokeClient for InMemoryBroker {
    async fn invoke_event(&self, function_name: &str, payload: Vec<u8>) -> Result<i32, BoxError> {
        self.take_failure()?;
        let body = String::from_utf8(payload)?;
        self.record(SentMessage {
            transport: TransportKind::Lambda,
            destination: function_name.to_string(),
            body,
            delay_seconds: 0,
        });
        Ok(self.invoke_status)
    }
}

#[async_trait]
impl PublishClient for InMemoryBroker {
    async fn publish(&self, topic_arn: &str, message: String) -> Result<Option<String>, BoxError> {
        self.take_failure()?;
        Ok(Some(self.record(SentMessage {
            transport: TransportKind::Sns,
            destination: topic_arn.to_string(),
            body: message,
            delay_seconds: 0,
        })))
    }
}

#[async_trait]
impl QueueClient for InMemoryBroker {
    async fn send_message(
        &self,
        queue_url: &str,
        body: String,
        delay_seconds: u32,
    ) -> Result<Option<String>, BoxError> {
        self.take_failure()?;
        Ok(Some(self.record(SentMessage {
            transport: TransportKind::Sqs,
            destination: queue_url.to_string(),
            body,
            delay_seconds,
        })))
    }
}

/// Identity client answering with a fixed account id.
#[derive(Debug)]
pub struct StaticAccount {
    account_id: String,
    lookups: AtomicUsize,
}

impl StaticAccount {
    /// Answers every lookup with `account_id`.
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            lookups: AtomicUsize::new(0),
        }
    }

    /// Number of lookups served.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityClient for StaticAccount {
    async fn account_id(&self) -> Result<String, BoxError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.account_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failure_injection_is_one_shot() {
        let broker = InMemoryBroker::new();
        broker.fail_next("boom");
        assert!(broker.send_message("q", "a".to_string(), 0).await.is_err());
        assert!(broker.send_message("q", "b".to_string(), 5).await.is_ok());
        let sent = broker.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, "b");
        assert!(broker.sent().is_empty());
    }
}
