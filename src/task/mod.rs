//! Asynchronous task bus.
//!
//! Application code defers a function call with
//! [`AsyncDispatcher::task`]`(path).enqueue(args, kwargs)`. On the platform
//! the call is encoded as a [`TaskMessage`] and handed to a [`Transport`];
//! the message comes back on a later invocation as a direct-command event
//! naming one of the receipt routers below, and [`TaskRouter`] runs it.
//! Off the platform the call runs inline.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use hapline::environment::PlatformEnvironment;
//! use hapline::registry::{FunctionRegistry, Signature};
//! use hapline::task::{AsyncDispatcher, Dispatch};
//! use serde_json::{json, Map};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut registry = FunctionRegistry::new();
//! registry
//!     .register("shop.math.add", Signature::fixed(2), |args, _| async move {
//!         let sum = args.iter().filter_map(|v| v.as_i64()).sum::<i64>();
//!         Ok(json!(sum))
//!     })
//!     .unwrap();
//!
//! // Not on the platform: the call runs inline.
//! let dispatcher = AsyncDispatcher::new(PlatformEnvironment::local(), Arc::new(registry));
//! let outcome = dispatcher
//!     .task("shop.math.add")
//!     .enqueue(vec![json!(1), json!(2)], Map::new())
//!     .await
//!     .unwrap();
//! assert!(matches!(outcome, Dispatch::Inline(v) if v == json!(3)));
//! # }
//! ```

pub mod dispatcher;
pub mod message;
pub mod router;
pub mod schedule;
pub mod transport;

pub use dispatcher::{AsyncDispatcher, Dispatch, TaskHandle};
pub use message::{AsyncContext, TaskMessage};
pub use router::TaskRouter;
pub use transport::{DeliveryOptions, DeliveryReceipt, Transport, TransportKind};

/// Receipt router for directly invoked messages.
pub const ROUTE_LAMBDA_TASK: &str = "hapline.route_lambda_task";

/// Receipt router for topic-delivered messages.
pub const ROUTE_SNS_TASK: &str = "hapline.route_sns_task";

/// Receipt router for queue-delivered messages.
pub const ROUTE_SQS_TASK: &str = "hapline.route_sqs_task";

/// No-op target of keep-warm schedules.
pub const KEEP_WARM_CALLBACK: &str = "hapline.keep_warm_callback";

/// `true` for the command paths the core handles itself.
pub fn is_builtin_command(path: &str) -> bool {
    matches!(
        path,
        ROUTE_LAMBDA_TASK | ROUTE_SNS_TASK | ROUTE_SQS_TASK | KEEP_WARM_CALLBACK
    )
}
