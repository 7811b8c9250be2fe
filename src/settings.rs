//! Deployment settings.
//!
//! Settings can be loaded from:
//! 1. TOML file (`hapline_settings.toml`)
//! 2. Environment variables (with `HAPLINE_` prefix)
//!
//! Environment variables override TOML configuration.
//!
//! # Example TOML Configuration
//!
//! ```toml
//! [hapline]
//! project_name = "shop"
//! api_stage = "production"
//! debug = false
//! authorizer_function = "shop.auth.authorize"
//! async_response_table = "shop-async-responses"
//! async_transport = "sqs"
//!
//! [hapline.event_source_mapping]
//! "arn:aws:sqs:us-east-1:123456789012:orders" = "shop.orders.ingest"
//!
//! [hapline.cognito_trigger_mapping]
//! PreSignUp_SignUp = "shop.auth.pre_sign_up"
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::task::transport::TransportKind;

/// File read by [`Settings::load`] when present in the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "hapline_settings.toml";

/// Everything the invocation core needs to know about the deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Project name, used in log context.
    pub project_name: String,

    /// Gateway stage. Becomes the script name on generated gateway domains.
    pub api_stage: String,

    /// Primary entry function for non-HTTP applications and log subscriptions.
    pub app_function: Option<String>,

    /// Framework settings reference handed to the management-command integration.
    pub framework_settings: Option<String>,

    /// Log raw events and include error chains in 500 responses.
    pub debug: bool,

    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// Function answering token-authorizer events.
    pub authorizer_function: Option<String>,

    /// Function receiving `(error, event, context)` for uncaught failures.
    ///
    /// A truthy return value marks the failure as handled.
    pub exception_handler: Option<String>,

    /// Event-source ARN to function path.
    pub event_source_mapping: HashMap<String, String>,

    /// `"{intent}:{invocationSource}"` to function path.
    pub bot_event_mapping: HashMap<String, String>,

    /// Identity-provider trigger name to function path.
    pub cognito_trigger_mapping: HashMap<String, String>,

    /// Base64-encode non-text response bodies and decode base64 request bodies.
    pub binary_support: bool,

    /// Honour `multiValueHeaders` on inbound events.
    pub multi_value_headers: bool,

    /// Custom domain serving the application, if any.
    pub domain: Option<String>,

    /// Path prefix mounted in front of the application on a custom domain.
    pub base_path: Option<String>,

    /// Header name to dotted path inside `requestContext`.
    pub context_header_mappings: HashMap<String, String>,

    /// Response store table for captured async results.
    pub async_response_table: Option<String>,

    /// Default transport for async tasks.
    pub async_transport: TransportKind,

    /// Explicit queue URL for the queue transport.
    pub async_queue_url: Option<String>,

    /// Explicit topic ARN for the topic transport.
    pub async_topic_arn: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project_name: String::new(),
            api_stage: "dev".to_string(),
            app_function: None,
            framework_settings: None,
            debug: false,
            log_level: "info".to_string(),
            authorizer_function: None,
            exception_handler: None,
            event_source_mapping: HashMap::new(),
            bot_event_mapping: HashMap::new(),
            cognito_trigger_mapping: HashMap::new(),
            binary_support: true,
            multi_value_headers: true,
            domain: None,
            base_path: None,
            context_header_mappings: HashMap::new(),
            async_response_table: None,
            async_transport: TransportKind::Lambda,
            async_queue_url: None,
            async_topic_arn: None,
        }
    }
}

impl Settings {
    /// Load settings from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. `hapline_settings.toml` in the working directory
    /// 3. Default values
    pub fn load() -> Result<Self> {
        let mut settings = if let Ok(contents) = std::fs::read_to_string(DEFAULT_SETTINGS_FILE) {
            Self::from_toml(&contents)?
        } else {
            Self::default()
        };

        settings.apply_env_overrides();

        Ok(settings)
    }

    /// Load settings from a specific file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.as_ref().display()))
        })?;
        let mut settings = Self::from_toml(&contents)?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Parse settings from TOML content.
    ///
    /// The settings live under a `[hapline]` table; a document without one
    /// yields the defaults.
    pub fn from_toml(content: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct Document {
            #[serde(default)]
            hapline: Settings,
        }

        let document: Document =
            toml::from_str(content).map_err(|e| Error::Config(format!("TOML parse error: {e}")))?;

        Ok(document.hapline)
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("HAPLINE_DEBUG").and_then(|v| v.parse().ok()) {
            self.debug = v;
        }
        if let Some(level) = lookup("HAPLINE_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(stage) = lookup("HAPLINE_API_STAGE") {
            self.api_stage = stage;
        }
        if let Some(domain) = lookup("HAPLINE_DOMAIN") {
            self.domain = Some(domain).filter(|d| !d.is_empty());
        }
        if let Some(v) = lookup("HAPLINE_BINARY_SUPPORT").and_then(|v| v.parse().ok()) {
            self.binary_support = v;
        }
        if let Some(table) = lookup("HAPLINE_ASYNC_RESPONSE_TABLE") {
            self.async_response_table = Some(table).filter(|t| !t.is_empty());
        }
        if let Some(kind) = lookup("HAPLINE_ASYNC_TRANSPORT").and_then(|v| v.parse().ok()) {
            self.async_transport = kind;
        }
    }

    /// Script name prefix used on the platform's generated domain.
    pub fn stage_prefix(&self) -> String {
        format!("/{}", self.api_stage)
    }
}
