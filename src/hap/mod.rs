//! Hosted Application Protocol.
//!
//! The HAP is the synchronous request-in, response-out convention the
//! hosted web application speaks. [`HapAdapter`] converts an HTTP-shaped
//! platform event into a [`HapRequest`], runs it through the
//! [`HapMiddlewareChain`] and the [`HostedApplication`], and shapes the
//! [`HapResponse`] into the platform's response envelope.
//!
//! # Examples
//!
//! ```
//! use hapline::hap::{hosted_fn, HapResponse};
//!
//! let app = hosted_fn(|request| async move {
//!     let body = format!("hello from {}", request.path);
//!     Ok(HapResponse::text(200, body))
//! });
//! # let _ = app;
//! ```

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::environment::InvocationContext;
use crate::error::BoxError;

pub mod adapter;
pub mod cookies;
pub mod headers;
pub mod middleware;
pub mod request;
pub mod response;

#[cfg(feature = "tower")]
pub mod tower;

pub use adapter::HapAdapter;
pub use cookies::{CookieJar, CookieMiddleware, PACKED_COOKIE_NAME};
pub use headers::{merge_headers, title_case, Headers};
pub use middleware::{HapContext, HapMiddleware, HapMiddlewareChain};

/// One HTTP request handed to the hosted application.
#[derive(Debug, Clone, Default)]
pub struct HapRequest {
    /// Request method, upper case.
    pub method: String,
    /// Prefix the application is mounted under (stage or base path).
    pub script_name: String,
    /// Percent-decoded path below the script name.
    pub path: String,
    /// URL-encoded query string without the leading `?`.
    pub query_string: String,
    /// Merged, title-cased request headers.
    pub headers: Headers,
    /// Raw request body.
    pub body: Vec<u8>,
    /// Client address.
    pub remote_addr: String,
    /// Authenticated principal, when the gateway supplied one.
    pub remote_user: Option<String>,
    /// URL scheme the client used.
    pub scheme: String,
    /// Host the request was addressed to.
    pub server_name: String,
    /// Port the request was addressed to.
    pub server_port: String,
    /// Gateway stage variables.
    pub stage_variables: Map<String, Value>,
    /// Authorizer block from the request context.
    pub authorizer: Option<Value>,
    /// The raw platform event.
    pub event: Value,
    /// Invocation metadata.
    pub context: InvocationContext,
}

impl HapRequest {
    /// First value of header `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Script name followed by path.
    pub fn full_path(&self) -> String {
        format!("{}{}", self.script_name, self.path)
    }

    /// Path and query as they appear on the request line.
    pub fn request_uri(&self) -> String {
        if self.query_string.is_empty() {
            self.full_path()
        } else {
            format!("{}?{}", self.full_path(), self.query_string)
        }
    }
}

/// The hosted application's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HapResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers; a name may carry several values.
    pub headers: Headers,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl HapResponse {
    /// Empty response with `status`.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// `text/plain` response.
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(body.into().into_bytes())
    }

    /// `application/json` response.
    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(body.to_string().into_bytes())
    }

    /// Adds a header value.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replaces the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Media type without parameters, lower-cased.
    pub fn media_type(&self) -> Option<String> {
        self.headers.get("Content-Type").map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    /// Status line text, e.g. `200 OK`.
    pub fn status_line(&self) -> String {
        let reason = http::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("Unknown");
        format!("{} {}", self.status, reason)
    }
}

/// A web application the adapter can host.
#[async_trait]
pub trait HostedApplication: Send + Sync {
    /// Serves one request.
    async fn call(&self, request: HapRequest) -> Result<HapResponse, BoxError>;
}

/// Hosted application backed by an async closure. See [`hosted_fn`].
pub struct FnApplication<F> {
    f: F,
}

impl<F> fmt::Debug for FnApplication<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnApplication").finish_non_exhaustive()
    }
}

/// Hosts an async closure.
pub fn hosted_fn<F, Fut>(f: F) -> FnApplication<F>
where
    F: Fn(HapRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HapResponse, BoxError>> + Send + 'static,
{
    FnApplication { f }
}

#[async_trait]
impl<F, Fut> HostedApplication for FnApplication<F>
where
    F: Fn(HapRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HapResponse, BoxError>> + Send + 'static,
{
    async fn call(&self, request: HapRequest) -> Result<HapResponse, BoxError> {
        (self.f)(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_strips_parameters() {
        let response = HapResponse::new(200).with_header("content-type", "Text/HTML; charset=utf-8");
        assert_eq!(response.media_type().as_deref(), Some("text/html"));
        assert_eq!(HapResponse::new(204).media_type(), None);
    }

    #[test]
    fn status_line_uses_reason_phrase() {
        assert_eq!(HapResponse::new(404).status_line(), "404 Not Found");
        assert_eq!(HapResponse::new(299).status_line(), "299 Unknown");
    }

    #[test]
    fn request_uri_includes_query() {
        let request = HapRequest {
            script_name: "/dev".to_string(),
            path: "/items".to_string(),
            query_string: "page=2".to_string(),
            ..Default::default()
        };
        assert_eq!(request.request_uri(), "/dev/items?page=2");
    }
}
