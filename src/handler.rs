//! The single entry point for every platform invocation.
//!
//! [`LambdaHandler`] is built once per process and reused by every warm
//! invocation. It classifies the event (see [`crate::event`]) and runs the
//! matching branch.
//!
//! # Errors surfacing to the platform
//!
//! An error from a non-HTTP branch goes to the configured exception
//! handler first; when the handler reports it handled, the invocation
//! returns `null`. Otherwise the error propagates and the platform's retry
//! accounting applies. [`Error::Unauthorized`] always propagates: the
//! platform reads it as a deny decision. HTTP failures are already served
//! as 500 responses by the [`HapAdapter`].
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use hapline::environment::InvocationContext;
//! use hapline::handler::LambdaHandler;
//! use hapline::registry::{FunctionRegistry, Signature};
//! use hapline::settings::Settings;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut registry = FunctionRegistry::new();
//! registry
//!     .register("shop.jobs.rebuild", Signature::fixed(1), |args, _| async move {
//!         Ok(json!({"rebuilt": args[0]["scope"]}))
//!     })
//!     .unwrap();
//!
//! let handler = LambdaHandler::new(Arc::new(Settings::default()), Arc::new(registry));
//! let result = handler
//!     .handle(json!({"command": "shop.jobs.rebuild", "scope": "all"}), InvocationContext::default())
//!     .await
//!     .unwrap();
//! assert_eq!(result, json!({"rebuilt": "all"}));
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::environment::InvocationContext;
use crate::error::{BoxError, Error, Result};
use crate::event::{resolve_record, scheduled_function, InboundEvent, RecordTarget};
use crate::hap::{HapAdapter, HostedApplication};
use crate::registry::FunctionRegistry;
use crate::settings::Settings;
use crate::task::{is_builtin_command, TaskRouter};

/// Evaluates `raw_command` expressions in-process.
///
/// Whatever implements this runs arbitrary code on behalf of the event
/// sender. Only direct invocations by the deployment owner can produce a
/// `raw_command` event; never expose the function to untrusted callers
/// when an evaluator is installed.
#[async_trait]
pub trait RawEvaluator: Send + Sync {
    /// Evaluates `expression` and returns its result.
    async fn evaluate(&self, expression: &str) -> std::result::Result<Value, BoxError>;
}

/// Runs web-framework management commands (`manage` events).
#[async_trait]
pub trait ManagementCommands: Send + Sync {
    /// Runs `command` against the framework configured by `framework_settings`.
    async fn run(
        &self,
        command: &Value,
        framework_settings: Option<&str>,
    ) -> std::result::Result<(), BoxError>;
}

/// Classifies and serves platform invocations.
#[derive(Clone)]
pub struct LambdaHandler {
    settings: Arc<Settings>,
    registry: Arc<FunctionRegistry>,
    router: TaskRouter,
    hap: Option<HapAdapter>,
    evaluator: Option<Arc<dyn RawEvaluator>>,
    management: Option<Arc<dyn ManagementCommands>>,
}

impl fmt::Debug for LambdaHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LambdaHandler")
            .field("registry", &self.registry)
            .field("router", &self.router)
            .field("hap", &self.hap)
            .field("evaluator", &self.evaluator.is_some())
            .field("management", &self.management.is_some())
            .finish()
    }
}

impl LambdaHandler {
    /// Handler for `registry` without a hosted application.
    ///
    /// Task messages run without requeue or capture until a configured
    /// [`TaskRouter`] is supplied.
    pub fn new(settings: Arc<Settings>, registry: Arc<FunctionRegistry>) -> Self {
        Self {
            router: TaskRouter::new(registry.clone()),
            settings,
            registry,
            hap: None,
            evaluator: None,
            management: None,
        }
    }

    /// Hosts `application` behind the default HAP adapter.
    pub fn with_application(self, application: Arc<dyn HostedApplication>) -> Self {
        let adapter = HapAdapter::new(application, self.settings.clone())
            .with_registry(self.registry.clone());
        self.with_hap_adapter(adapter)
    }

    /// Serves HTTP events through `adapter`.
    pub fn with_hap_adapter(mut self, adapter: HapAdapter) -> Self {
        self.hap = Some(adapter);
        self
    }

    /// Replaces the receipt router.
    pub fn with_task_router(mut self, router: TaskRouter) -> Self {
        self.router = router;
        self
    }

    /// Enables `raw_command` events. See [`RawEvaluator`].
    pub fn with_raw_evaluator(mut self, evaluator: Arc<dyn RawEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Enables `manage` events.
    pub fn with_management_commands(mut self, management: Arc<dyn ManagementCommands>) -> Self {
        self.management = Some(management);
        self
    }

    /// Settings the handler was built with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Serves one invocation.
    ///
    /// # Errors
    ///
    /// See the module documentation.
    pub async fn handle(&self, event: Value, context: InvocationContext) -> Result<Value> {
        if self.settings.debug {
            tracing::debug!(request_id = %context.request_id, event = %event, "raw event");
        }

        let inbound = InboundEvent::classify(&event);
        tracing::debug!(request_id = %context.request_id, kind = inbound.kind(), "classified event");

        if inbound == InboundEvent::Http {
            return self.serve_http(&event, &context).await;
        }

        match self.dispatch(inbound, &event, &context).await {
            Ok(result) => Ok(result),
            Err(Error::Unauthorized) => Err(Error::Unauthorized),
            Err(error) => {
                tracing::error!(
                    request_id = %context.request_id,
                    kind = inbound.kind(),
                    error = %error,
                    "invocation failed"
                );
                if self.exception_handled(&error, &event, &context).await {
                    Ok(Value::Null)
                } else {
                    Err(error)
                }
            },
        }
    }

    async fn dispatch(
        &self,
        inbound: InboundEvent<'_>,
        event: &Value,
        context: &InvocationContext,
    ) -> Result<Value> {
        match inbound {
            InboundEvent::Scheduled { resource } => match scheduled_function(resource) {
                Some(path) => self.run_named(path, event, context).await,
                None => {
                    tracing::debug!(resource, "scheduled event names no function");
                    Ok(Value::Null)
                },
            },
            InboundEvent::Command { path } => {
                let result = self.run_named(path, event, context).await?;
                tracing::info!(command = path, result = %result, "command result");
                Ok(result)
            },
            InboundEvent::RawCommand { expression } => {
                let Some(evaluator) = self.evaluator.as_ref() else {
                    tracing::warn!("raw_command event ignored: no evaluator installed");
                    return Ok(Value::Null);
                };
                let result = evaluator
                    .evaluate(expression)
                    .await
                    .map_err(|source| Error::Function {
                        path: "raw_command".to_string(),
                        source,
                    })?;
                tracing::info!(result = %result, "raw_command result");
                Ok(result)
            },
            InboundEvent::Manage { command } => {
                match self.management.as_ref() {
                    Some(management) => management
                        .run(command, self.settings.framework_settings.as_deref())
                        .await
                        .map_err(|source| Error::Function {
                            path: "manage".to_string(),
                            source,
                        })?,
                    None => tracing::warn!("manage event ignored: no management integration installed"),
                }
                Ok(json!({}))
            },
            InboundEvent::Records { records } => {
                match resolve_record(&records[0], &self.settings.event_source_mapping) {
                    RecordTarget::Function(path) | RecordTarget::Command(path) => {
                        self.run_named(&path, event, context).await
                    },
                    RecordTarget::Unresolved { source_id } => {
                        let error = Error::UnresolvedEventSource {
                            source_id: source_id.unwrap_or_else(|| "unknown".to_string()),
                        };
                        tracing::error!(error = %error, "cannot find a function for the event source");
                        Ok(Value::Null)
                    },
                }
            },
            InboundEvent::Bot {
                intent,
                invocation_source,
            } => {
                let key = format!(
                    "{}:{}",
                    intent.unwrap_or_default(),
                    invocation_source.unwrap_or_default()
                );
                match self.settings.bot_event_mapping.get(&key) {
                    Some(path) => self.run_named(path, event, context).await,
                    None => {
                        tracing::error!(intent = %key, "cannot find a function for the bot intent");
                        Ok(Value::Null)
                    },
                }
            },
            InboundEvent::TokenAuthorizer => match self.settings.authorizer_function.as_deref() {
                Some(path) => self.run_named(path, event, context).await,
                None => {
                    tracing::error!("token authorizer event without an authorizer function");
                    Err(Error::Unauthorized)
                },
            },
            InboundEvent::CognitoTrigger { trigger } => {
                match self.settings.cognito_trigger_mapping.get(trigger) {
                    Some(path) => self.run_named(path, event, context).await,
                    None => {
                        tracing::error!(trigger, "cannot find a function for the identity trigger");
                        Ok(event.clone())
                    },
                }
            },
            InboundEvent::LogSubscription => match self.settings.app_function.as_deref() {
                Some(path) => self.run_named(path, event, context).await,
                None => {
                    tracing::warn!("log subscription event ignored: no app_function configured");
                    Ok(Value::Null)
                },
            },
            InboundEvent::Http => self.serve_http(event, context).await,
            InboundEvent::Unrecognized => {
                tracing::debug!("ignoring event of unknown shape");
                Ok(Value::Null)
            },
        }
    }

    /// Runs a built-in command or a registered function.
    async fn run_named(&self, path: &str, event: &Value, context: &InvocationContext) -> Result<Value> {
        if is_builtin_command(path) {
            // Only the keep-warm callback is not a receipt router.
            return self
                .router
                .route(path, event)
                .await
                .unwrap_or(Ok(Value::Null));
        }
        self.registry
            .run_function(path, event.clone(), context.to_value())
            .await
    }

    async fn serve_http(&self, event: &Value, context: &InvocationContext) -> Result<Value> {
        match self.hap.as_ref() {
            Some(adapter) => adapter.handle(event, context).await,
            None => Err(Error::Config(
                "HTTP event received but no hosted application is configured".to_string(),
            )),
        }
    }

    async fn exception_handled(&self, error: &Error, event: &Value, context: &InvocationContext) -> bool {
        let Some(path) = self.settings.exception_handler.as_deref() else {
            return false;
        };
        self.registry
            .handle_exception(path, error, event, &context.to_value())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Signature;
    use pretty_assertions::assert_eq;

    fn handler(settings: Settings) -> LambdaHandler {
        let mut registry = FunctionRegistry::new();
        registry
            .register("app.echo", Signature::fixed(1), |args, _| async move {
                Ok(args.into_iter().next().unwrap_or(Value::Null))
            })
            .unwrap();
        registry
            .register("app.fail", Signature::fixed(0), |_, _| async {
                Err::<Value, BoxError>("nope".into())
            })
            .unwrap();
        registry
            .register("app.on_error", Signature::fixed(3), |_, _| async { Ok(json!(true)) })
            .unwrap();
        LambdaHandler::new(Arc::new(settings), Arc::new(registry))
    }

    async fn run(handler: &LambdaHandler, event: Value) -> Result<Value> {
        handler.handle(event, InvocationContext::default()).await
    }

    #[tokio::test]
    async fn keep_warm_is_a_noop() {
        let event = json!({
            "detail-type": "Scheduled Event",
            "resources": ["arn:aws:events:us-east-1:1:rule/shop-dev-hapline.keep_warm_callback"],
        });
        assert_eq!(run(&handler(Settings::default()), event).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn builtin_commands_shadow_registered_functions() {
        let mut registry = FunctionRegistry::new();
        registry
            .register(crate::task::KEEP_WARM_CALLBACK, Signature::fixed(0), |_, _| async {
                Ok(json!("ran"))
            })
            .unwrap();
        let handler = LambdaHandler::new(Arc::new(Settings::default()), Arc::new(registry));
        let event = json!({"command": crate::task::KEEP_WARM_CALLBACK});
        assert_eq!(run(&handler, event).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn missing_authorizer_is_unauthorized_even_with_handler() {
        let settings = Settings {
            exception_handler: Some("app.on_error".to_string()),
            ..Settings::default()
        };
        let err = run(&handler(settings), json!({"type": "TOKEN"})).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized));
    }

    #[tokio::test]
    async fn handled_failure_returns_null() {
        let settings = Settings {
            exception_handler: Some("app.on_error".to_string()),
            ..Settings::default()
        };
        let result = run(&handler(settings), json!({"command": "app.fail"})).await.unwrap();
        assert_eq!(result, Value::Null);

        let err = run(&handler(Settings::default()), json!({"command": "app.fail"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Function { .. }));
    }

    #[tokio::test]
    async fn raw_command_without_evaluator_is_ignored() {
        let result = run(&handler(Settings::default()), json!({"raw_command": "1 + 1"}))
            .await
            .unwrap();
        assert_eq!(result, Value::Null);
    }

    #[tokio::test]
    async fn http_without_application_is_config_error() {
        let err = run(&handler(Settings::default()), json!({"httpMethod": "GET"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
