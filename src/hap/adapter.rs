//! The HTTP branch of the invocation core.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use super::cookies::CookieMiddleware;
use super::middleware::{HapContext, HapMiddleware, HapMiddlewareChain};
use super::request::build_request;
use super::response::{to_envelope, EnvelopeShape};
use super::{HapResponse, HostedApplication};
use crate::environment::InvocationContext;
use crate::error::{Error, Result};
use crate::registry::FunctionRegistry;
use crate::settings::Settings;

/// Message of every 500 response produced for an uncaught failure.
pub const UNCAUGHT_MESSAGE: &str = "An uncaught exception happened while servicing this request.";

/// Request-line facts kept for the access log.
#[derive(Debug, Clone)]
struct AccessLine {
    remote_addr: String,
    remote_user: Option<String>,
    method: String,
    uri: String,
}

/// Serves HTTP-shaped events through a [`HostedApplication`].
///
/// Built once per process and reused across warm invocations. The
/// cookie-packing middleware is installed by default.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use hapline::environment::InvocationContext;
/// use hapline::hap::{hosted_fn, HapAdapter, HapResponse};
/// use hapline::settings::Settings;
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() {
/// let app = hosted_fn(|request| async move {
///     Ok(HapResponse::text(200, request.method))
/// });
/// let adapter = HapAdapter::new(Arc::new(app), Arc::new(Settings::default()));
///
/// let event = json!({"httpMethod": "GET", "path": "/", "headers": {}});
/// let envelope = adapter
///     .handle(&event, &InvocationContext::with_request_id("req-1"))
///     .await
///     .unwrap();
/// assert_eq!(envelope["statusCode"], 200);
/// assert_eq!(envelope["body"], "GET");
/// # }
/// ```
#[derive(Clone)]
pub struct HapAdapter {
    application: Arc<dyn HostedApplication>,
    middleware: HapMiddlewareChain,
    settings: Arc<Settings>,
    registry: Option<Arc<FunctionRegistry>>,
}

impl fmt::Debug for HapAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HapAdapter")
            .field("middleware", &self.middleware)
            .field("exception_handler", &self.settings.exception_handler)
            .finish_non_exhaustive()
    }
}

impl HapAdapter {
    /// Hosts `application` with the cookie-packing middleware installed.
    pub fn new(application: Arc<dyn HostedApplication>, settings: Arc<Settings>) -> Self {
        let mut middleware = HapMiddlewareChain::new();
        middleware.add(Arc::new(CookieMiddleware::new()));
        Self {
            application,
            middleware,
            settings,
            registry: None,
        }
    }

    /// Adds a middleware to the chain.
    pub fn with_middleware(mut self, middleware: Arc<dyn HapMiddleware>) -> Self {
        self.middleware.add(middleware);
        self
    }

    /// Registry that resolves the configured exception handler.
    pub fn with_registry(mut self, registry: Arc<FunctionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Settings the adapter was built with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Serves one HTTP event and returns the response envelope.
    ///
    /// Failures become a 500 envelope. When an exception handler is
    /// configured it sees the failure first, and a falsy answer turns the
    /// failure back into an error so the platform records it.
    ///
    /// # Errors
    ///
    /// The serving failure itself, only when the exception handler declined
    /// to mark it handled.
    pub async fn handle(&self, event: &Value, context: &InvocationContext) -> Result<Value> {
        let shape = EnvelopeShape::of(event);
        let mut hap_context = HapContext::new(context.request_id.clone());

        let response = match self.serve(event, context, &mut hap_context).await {
            Ok(response) => response,
            Err(error) => {
                self.middleware.handle_error(&error, &hap_context).await;
                tracing::error!(
                    request_id = %context.request_id,
                    error = %error,
                    "uncaught failure serving request"
                );
                if !self.report(&error, event, context).await {
                    return Err(error);
                }
                self.error_response(&error)
            },
        };

        self.log_access(&response, &hap_context);
        Ok(to_envelope(&response, shape, self.settings.binary_support))
    }

    async fn serve(
        &self,
        event: &Value,
        context: &InvocationContext,
        hap_context: &mut HapContext,
    ) -> Result<HapResponse> {
        let mut request = build_request(event, context, &self.settings)?;
        self.middleware.process_request(&mut request, hap_context).await?;
        hap_context.extensions.insert(AccessLine {
            remote_addr: request.remote_addr.clone(),
            remote_user: request.remote_user.clone(),
            method: request.method.clone(),
            uri: request.request_uri(),
        });

        let mut response = self
            .application
            .call(request)
            .await
            .map_err(Error::HostedApplication)?;
        self.middleware
            .process_response(&mut response, hap_context)
            .await?;
        Ok(response)
    }

    /// Runs the exception handler. `true` means "serve a 500".
    async fn report(&self, error: &Error, event: &Value, context: &InvocationContext) -> bool {
        let (Some(path), Some(registry)) = (
            self.settings.exception_handler.as_deref(),
            self.registry.as_deref(),
        ) else {
            return true;
        };
        registry
            .handle_exception(path, error, event, &context.to_value())
            .await
    }

    fn error_response(&self, error: &Error) -> HapResponse {
        let mut body = json!({ "message": UNCAUGHT_MESSAGE });
        if self.settings.debug {
            body["traceback"] = json!(error.chain());
        }
        HapResponse::json(500, &body)
    }

    fn log_access(&self, response: &HapResponse, context: &HapContext) {
        let Some(line) = context.extensions.get::<AccessLine>() else {
            return;
        };
        tracing::info!(
            request_id = %context.request_id,
            status = response.status,
            "{} - {} [{}] \"{} {} HTTP/1.1\" {} {} {}",
            line.remote_addr,
            line.remote_user.as_deref().unwrap_or("-"),
            Utc::now().format("%d/%b/%Y:%H:%M:%S %z"),
            line.method,
            line.uri,
            response.status,
            response.body.len(),
            context.elapsed().as_millis(),
        );
    }
}
