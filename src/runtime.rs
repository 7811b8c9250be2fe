//! `lambda_runtime` entry point.
//!
//! ```rust,ignore
//! #[tokio::main]
//! async fn main() -> Result<(), lambda_runtime::Error> {
//!     let settings = Arc::new(Settings::load()?);
//!     hapline::logging::init(&settings);
//!     let handler = LambdaHandler::new(settings, Arc::new(registry()))
//!         .with_application(Arc::new(app()));
//!     hapline::runtime::run(Arc::new(handler)).await
//! }
//! ```

use std::sync::Arc;

use lambda_runtime::{service_fn, LambdaEvent};
use serde_json::Value;

use crate::environment::InvocationContext;
use crate::handler::LambdaHandler;

/// Converts the runtime's context into the one functions receive.
pub fn invocation_context(context: &lambda_runtime::Context) -> InvocationContext {
    InvocationContext {
        request_id: context.request_id.clone(),
        function_name: context.env_config.function_name.clone(),
        function_version: context.env_config.version.clone(),
        invoked_function_arn: context.invoked_function_arn.clone(),
        memory_limit_in_mb: context.env_config.memory,
        deadline_ms: context.deadline,
    }
}

/// Serves invocations with `handler` until the runtime shuts down.
///
/// The handler is shared by every invocation of the process.
pub async fn run(handler: Arc<LambdaHandler>) -> Result<(), lambda_runtime::Error> {
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let handler = handler.clone();
        async move {
            let context = invocation_context(&event.context);
            handler
                .handle(event.payload, context)
                .await
                .map_err(lambda_runtime::Error::from)
        }
    }))
    .await
}
