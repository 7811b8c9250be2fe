//! HAP middleware for request/response interception.
//!
//! Middleware wraps the hosted application: `on_request` hooks run in
//! priority order before the application sees the request, `on_response`
//! hooks run in the same order on its response. Per-request state travels
//! in [`HapContext::extensions`].
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use hapline::error::Result;
//! use hapline::hap::{HapContext, HapMiddleware, HapMiddlewareChain, HapRequest};
//!
//! struct RequestId;
//!
//! #[async_trait]
//! impl HapMiddleware for RequestId {
//!     async fn on_request(&self, request: &mut HapRequest, context: &mut HapContext) -> Result<()> {
//!         request.headers.insert("X-Request-Id", context.request_id.clone());
//!         Ok(())
//!     }
//! }
//!
//! let mut chain = HapMiddlewareChain::new();
//! chain.add(Arc::new(RequestId));
//! assert_eq!(chain.len(), 1);
//! ```

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use super::{HapRequest, HapResponse};
use crate::error::{Error, Result};

/// State of one request as it moves through the middleware chain.
#[derive(Debug)]
pub struct HapContext {
    /// Platform request id.
    pub request_id: String,

    /// When the adapter started serving the request.
    pub start_time: Instant,

    /// Typed per-request values shared between hooks.
    pub extensions: http::Extensions,
}

impl HapContext {
    /// Create a new context.
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            start_time: Instant::now(),
            extensions: http::Extensions::new(),
        }
    }

    /// Get elapsed time since request start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}

/// Hook around the hosted application.
#[async_trait]
pub trait HapMiddleware: Send + Sync {
    /// Called before the application sees the request.
    async fn on_request(&self, request: &mut HapRequest, context: &mut HapContext) -> Result<()> {
        let _ = (request, context);
        Ok(())
    }

    /// Called on the application's response before it is shaped for the platform.
    async fn on_response(&self, response: &mut HapResponse, context: &mut HapContext) -> Result<()> {
        let _ = (response, context);
        Ok(())
    }

    /// Called when the application or another hook failed.
    async fn on_error(&self, error: &Error, context: &HapContext) {
        let _ = (error, context);
    }

    /// Get middleware priority (lower runs first).
    fn priority(&self) -> i32 {
        50
    }
}

/// Chain of HAP middleware, executed in priority order.
#[derive(Default, Clone)]
pub struct HapMiddlewareChain {
    middlewares: Vec<Arc<dyn HapMiddleware>>,
}

impl std::fmt::Debug for HapMiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HapMiddlewareChain")
            .field("middleware_count", &self.middlewares.len())
            .finish()
    }
}

impl HapMiddlewareChain {
    /// Create a new empty middleware chain.
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    /// Add middleware to the chain.
    ///
    /// Middleware will be sorted by priority (lower priority executes first).
    pub fn add(&mut self, middleware: Arc<dyn HapMiddleware>) {
        self.middlewares.push(middleware);
        self.middlewares.sort_by_key(|m| m.priority());
    }

    /// Number of middleware in the chain.
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// `true` when the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Runs every `on_request` hook.
    pub async fn process_request(
        &self,
        request: &mut HapRequest,
        context: &mut HapContext,
    ) -> Result<()> {
        for middleware in &self.middlewares {
            middleware.on_request(request, context).await?;
        }
        Ok(())
    }

    /// Runs every `on_response` hook.
    pub async fn process_response(
        &self,
        response: &mut HapResponse,
        context: &mut HapContext,
    ) -> Result<()> {
        for middleware in &self.middlewares {
            middleware.on_response(response, context).await?;
        }
        Ok(())
    }

    /// Notifies every middleware of a failure.
    pub async fn handle_error(&self, error: &Error, context: &HapContext) {
        for middleware in &self.middlewares {
            middleware.on_error(error, context).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        priority: i32,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl HapMiddleware for Recorder {
        async fn on_request(&self, _: &mut HapRequest, _: &mut HapContext) -> Result<()> {
            self.log.lock().push(self.name);
            Ok(())
        }

        fn priority(&self) -> i32 {
            self.priority
        }
    }

    #[tokio::test]
    async fn runs_in_priority_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HapMiddlewareChain::new();
        for (name, priority) in [("late", 90), ("early", 10), ("default", 50)] {
            chain.add(Arc::new(Recorder {
                name,
                priority,
                log: log.clone(),
            }));
        }
        let mut context = HapContext::new("req-1");
        chain
            .process_request(&mut HapRequest::default(), &mut context)
            .await
            .unwrap();
        assert_eq!(*log.lock(), vec!["early", "default", "late"]);
    }

    #[test]
    fn context_carries_extensions() {
        #[derive(Clone, PartialEq, Debug)]
        struct Marker(u8);

        let mut context = HapContext::new("req-2");
        context.extensions.insert(Marker(3));
        assert_eq!(context.extensions.get::<Marker>(), Some(&Marker(3)));
    }
}
