//! Loading settings from disk and wiring them into the core.

use std::sync::Arc;

use hapline::environment::{InvocationContext, PlatformEnvironment};
use hapline::registry::FunctionRegistry;
use hapline::settings::Settings;
use hapline::task::{AsyncDispatcher, TransportKind};
use hapline::{Error, LambdaHandler};
use pretty_assertions::assert_eq;
use serde_json::json;

const SETTINGS: &str = r#"
[hapline]
project_name = "shop"
api_stage = "production"
app_function = "shop.app.main"
authorizer_function = "shop.auth.authorize"
exception_handler = "shop.errors.report"
binary_support = false
domain = "shop.example.com"
async_response_table = "shop-async-responses"
async_transport = "sns"
async_topic_arn = "arn:aws:sns:us-east-1:123456789012:shop-async"

[hapline.bot_event_mapping]
"OrderFlowers:DialogCodeHook" = "shop.bot.order"

[hapline.context_header_mappings]
X-Source-Ip = "identity.sourceIp"
"#;

#[test]
fn reads_file_with_nested_tables() {
    let path = std::env::temp_dir().join(format!("hapline-settings-{}.toml", std::process::id()));
    std::fs::write(&path, SETTINGS).unwrap();
    let settings = Settings::from_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(settings.project_name, "shop");
    assert_eq!(settings.stage_prefix(), "/production");
    assert_eq!(settings.exception_handler.as_deref(), Some("shop.errors.report"));
    assert!(!settings.binary_support);
    assert!(settings.multi_value_headers);
    assert_eq!(settings.async_transport, TransportKind::Sns);
    assert_eq!(
        settings.bot_event_mapping.get("OrderFlowers:DialogCodeHook").map(String::as_str),
        Some("shop.bot.order")
    );
    assert_eq!(
        settings.context_header_mappings.get("X-Source-Ip").map(String::as_str),
        Some("identity.sourceIp")
    );
}

#[test]
fn missing_file_is_config_error() {
    let err = Settings::from_file("/nonexistent/hapline_settings.toml").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn unknown_transport_is_config_error() {
    let err = Settings::from_toml("[hapline]\nasync_transport = \"carrier-pigeon\"\n").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn dispatcher_takes_defaults_from_settings() {
    let settings = Settings::from_toml(SETTINGS).unwrap();
    let dispatcher = AsyncDispatcher::new(PlatformEnvironment::local(), Arc::new(FunctionRegistry::new()))
        .configured(&settings);
    let debug = format!("{dispatcher:?}");
    assert!(debug.contains("default_transport: Sns"));
    assert!(debug.contains("capture_enabled: true"));
}

#[tokio::test]
async fn unregistered_authorizer_surfaces_through_exception_policy() {
    let settings = Settings::from_toml(SETTINGS).unwrap();
    let handler = LambdaHandler::new(Arc::new(settings), Arc::new(FunctionRegistry::new()));
    // The authorizer path is configured but nothing is registered under it;
    // the exception handler is not registered either, so the error propagates.
    let err = handler
        .handle(json!({"type": "TOKEN"}), InvocationContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FunctionNotFound(path) if path == "shop.auth.authorize"));
}
