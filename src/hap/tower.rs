//! Hosting `tower` services.
//!
//! Any `tower::Service<http::Request<Full<Bytes>>>` (an axum `Router`, a
//! hyper service) can be hosted by wrapping it in [`TowerApplication`].
//! The request URI carries the script name and path; the script name alone
//! is also available as a [`ScriptName`] request extension so routers that
//! are mounted below it can strip it.
//!
//! # Example
//!
//! ```rust,ignore
//! use hapline::hap::tower::TowerApplication;
//!
//! let app = axum::Router::new().route("/", axum::routing::get(|| async { "hi" }));
//! let adapter = HapAdapter::new(Arc::new(TowerApplication::new(app)), settings);
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http_body_util::{BodyExt, Full};
use tower::{Service, ServiceExt};

use super::{HapRequest, HapResponse, HostedApplication};
use crate::environment::InvocationContext;
use crate::error::BoxError;

/// Prefix the application is mounted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptName(pub String);

/// A tower service hosted as a HAP application.
#[derive(Debug, Clone)]
pub struct TowerApplication<S> {
    service: S,
}

impl<S> TowerApplication<S> {
    /// Wraps `service`.
    pub fn new(service: S) -> Self {
        Self { service }
    }

    /// Get a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.service
    }
}

/// Converts a HAP request into an `http::Request`.
///
/// Headers whose name or value `http` rejects are dropped with a warning.
pub fn into_http_request(request: HapRequest) -> Result<http::Request<Full<Bytes>>, BoxError> {
    let mut uri = encode_path(&request.full_path());
    if !uri.starts_with('/') {
        uri.insert(0, '/');
    }
    if !request.query_string.is_empty() {
        uri.push('?');
        uri.push_str(&request.query_string);
    }
    let mut builder = http::Request::builder()
        .method(request.method.as_str())
        .uri(uri);
    for (name, value) in request.headers.iter() {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => builder = builder.header(name, value),
            _ => tracing::warn!(header = name, "dropping header http cannot represent"),
        }
    }
    let mut http_request = builder.body(Full::new(Bytes::from(request.body)))?;
    let extensions = http_request.extensions_mut();
    extensions.insert(ScriptName(request.script_name));
    extensions.insert::<InvocationContext>(request.context);
    Ok(http_request)
}

/// Re-encodes a decoded path segment by segment.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/")
}

/// Collects an `http::Response` into a HAP response.
pub async fn from_http_response<B>(response: http::Response<B>) -> Result<HapResponse, BoxError>
where
    B: http_body::Body,
    B::Error: Into<BoxError>,
{
    let (parts, body) = response.into_parts();
    let body = body.collect().await.map_err(Into::into)?.to_bytes();
    let mut hap = HapResponse::new(parts.status.as_u16()).with_body(body.to_vec());
    for (name, value) in &parts.headers {
        hap.headers
            .append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
    }
    Ok(hap)
}

#[async_trait]
impl<S, B> HostedApplication for TowerApplication<S>
where
    S: Service<http::Request<Full<Bytes>>, Response = http::Response<B>>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
    B: http_body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    async fn call(&self, request: HapRequest) -> Result<HapResponse, BoxError> {
        let http_request = into_http_request(request)?;
        let response = self
            .service
            .clone()
            .oneshot(http_request)
            .await
            .map_err(Into::into)?;
        from_http_response(response).await
    }
}
