//! Platform markers and per-invocation context.

use serde::{Deserialize, Serialize};

/// Set by the platform on every compute function instance.
pub const FUNCTION_NAME_VAR: &str = "AWS_LAMBDA_FUNCTION_NAME";

/// Region the function runs in.
pub const REGION_VAR: &str = "AWS_REGION";

/// What the process knows about the platform it runs on.
///
/// Captured once and passed around explicitly; nothing in the crate reads
/// the markers from the process environment after construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformEnvironment {
    /// Name of the running compute function, present only on the platform.
    pub function_name: Option<String>,
    /// Region of the running compute function.
    pub region: Option<String>,
}

impl PlatformEnvironment {
    /// Reads the platform markers from the process environment.
    pub fn from_env() -> Self {
        Self {
            function_name: std::env::var(FUNCTION_NAME_VAR).ok().filter(|v| !v.is_empty()),
            region: std::env::var(REGION_VAR).ok().filter(|v| !v.is_empty()),
        }
    }

    /// Environment of a process running on the platform.
    pub fn on_platform(function_name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            function_name: Some(function_name.into()),
            region: Some(region.into()),
        }
    }

    /// Environment of a process running anywhere else (tests, local runs).
    pub fn local() -> Self {
        Self::default()
    }

    /// `true` when the function-name marker is present.
    pub fn is_on_platform(&self) -> bool {
        self.function_name.is_some()
    }
}

/// Invocation metadata handed to functions as their `context` argument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationContext {
    /// Platform request id of this invocation.
    pub request_id: String,
    /// Name of the invoked function.
    pub function_name: String,
    /// Version of the invoked function.
    pub function_version: String,
    /// ARN used to invoke the function.
    pub invoked_function_arn: String,
    /// Configured memory in MB.
    pub memory_limit_in_mb: i32,
    /// Deadline as epoch milliseconds.
    pub deadline_ms: u64,
}

impl InvocationContext {
    /// Context with only a request id, for local and test invocations.
    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Default::default()
        }
    }

    /// The context as the JSON value functions receive.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
