//! Hapline
//!
//! Invocation core for applications deployed to a serverless compute
//! platform that is only reachable through discrete invocation events.
//!
//! # Architecture
//!
//! - **Event classification**: [`event::InboundEvent`] sorts an untyped
//!   event into one of eleven shapes by fixed precedence, and
//!   [`handler::LambdaHandler`] runs the matching branch.
//! - **Hosted applications**: [`hap::HapAdapter`] turns HTTP-shaped events
//!   into [`hap::HapRequest`]s for a [`hap::HostedApplication`] and shapes
//!   the answer into the platform response envelope. Cookies are packed
//!   into one by [`hap::CookieMiddleware`].
//! - **Async task bus**: [`task::AsyncDispatcher`] defers function calls
//!   through a direct-invoke, topic or queue [`task::Transport`];
//!   [`task::TaskRouter`] runs them when they come back, re-queueing
//!   messages whose execution time is beyond the transport's delay limit.
//!   Results can be captured in a [`store::ResponseStore`].
//!
//! # Features
//!
//! - `logging` (default): [`logging::init`]
//! - `aws`: AWS SDK transport clients
//! - `dynamodb`: DynamoDB response store
//! - `lambda`: `lambda_runtime` entry point, [`runtime::run`]
//! - `tower`: host any `tower::Service` as an application

#![warn(missing_docs)]

pub mod environment;
pub mod error;
pub mod event;
pub mod handler;
pub mod hap;
pub mod registry;
pub mod settings;
pub mod store;
pub mod task;

#[cfg(feature = "logging")]
pub mod logging;

#[cfg(feature = "lambda")]
pub mod runtime;

pub use environment::{InvocationContext, PlatformEnvironment};
pub use error::{BoxError, DeliveryError, Error, Result};
pub use handler::LambdaHandler;
pub use registry::{FunctionRegistry, Signature};
pub use settings::Settings;
