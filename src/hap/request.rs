//! Inbound event to [`HapRequest`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;

use super::headers::{merge_headers, Headers};
use super::HapRequest;
use crate::environment::InvocationContext;
use crate::error::{Error, Result};
use crate::settings::Settings;

/// Methods whose body may arrive base64-encoded.
pub const BINARY_METHODS: [&str; 6] = ["POST", "PUT", "PATCH", "DELETE", "CONNECT", "OPTIONS"];

/// Substring identifying the platform's generated gateway domains.
const GENERATED_DOMAIN: &str = "amazonaws.com";

/// `true` when the event came from the load balancer rather than the gateway.
pub fn is_elb_event(event: &Value) -> bool {
    event
        .pointer("/requestContext/elb")
        .is_some_and(|elb| !elb.is_null())
}

/// Script name for a gateway request.
///
/// The stage prefix is injected when the request was addressed to a
/// generated gateway domain, and omitted on custom domains. A request
/// without a host is a console test: the stage prefix applies unless a
/// custom domain is configured. Load-balancer requests never carry one.
pub fn script_name_for(event: &Value, headers: &Headers, settings: &Settings) -> String {
    if is_elb_event(event) {
        return String::new();
    }
    match headers.get("Host") {
        Some(host) if host.contains(GENERATED_DOMAIN) => settings.stage_prefix(),
        Some(_) => String::new(),
        None if settings.domain.is_some() => String::new(),
        None => settings.stage_prefix(),
    }
}

/// Builds the request the hosted application sees.
///
/// # Errors
///
/// [`Error::InvalidEvent`] when the event has no method or a base64 body
/// that does not decode.
pub fn build_request(
    event: &Value,
    context: &InvocationContext,
    settings: &Settings,
) -> Result<HapRequest> {
    let method = event
        .get("httpMethod")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| Error::InvalidEvent("missing httpMethod".to_string()))?
        .to_ascii_uppercase();

    let mut headers = merge_headers(event, settings.multi_value_headers);
    let request_context = event.get("requestContext").unwrap_or(&Value::Null);
    inject_context_headers(&mut headers, request_context, settings);

    let mut script_name = script_name_for(event, &headers, settings);
    let mut path = decode_path(event.get("path").and_then(Value::as_str).unwrap_or("/"));
    if let Some(base) = settings
        .base_path
        .as_deref()
        .map(|b| b.trim_matches('/'))
        .filter(|b| !b.is_empty())
    {
        let prefix = format!("/{base}");
        script_name = prefix.clone();
        if let Some(rest) = path.strip_prefix(&prefix) {
            if rest.is_empty() || rest.starts_with('/') {
                path = rest.to_string();
            }
        }
    }

    let body = decode_body(event, &method, settings.binary_support)?;
    let remote_addr = remote_addr(&headers);
    let remote_user = remote_user(request_context);
    let server_name = headers
        .get("Host")
        .map(str::to_string)
        .or_else(|| settings.domain.clone())
        .unwrap_or_else(|| "hapline".to_string());
    let server_port = headers
        .get("X-Forwarded-Port")
        .unwrap_or("443")
        .to_string();

    Ok(HapRequest {
        method,
        script_name,
        path,
        query_string: query_string(event),
        headers,
        body,
        remote_addr,
        remote_user,
        scheme: "https".to_string(),
        server_name,
        server_port,
        stage_variables: event
            .get("stageVariables")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
        authorizer: request_context
            .get("authorizer")
            .filter(|a| !a.is_null())
            .cloned(),
        event: event.clone(),
        context: context.clone(),
    })
}

fn decode_path(raw: &str) -> String {
    let bytes = urlencoding::decode_binary(raw.as_bytes());
    String::from_utf8_lossy(&bytes).into_owned()
}

fn decode_body(event: &Value, method: &str, binary_support: bool) -> Result<Vec<u8>> {
    let Some(body) = event.get("body").and_then(Value::as_str) else {
        return Ok(Vec::new());
    };
    let encoded = event
        .get("isBase64Encoded")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if binary_support && encoded && BINARY_METHODS.contains(&method) {
        return STANDARD
            .decode(body)
            .map_err(|e| Error::InvalidEvent(format!("body is not valid base64: {e}")));
    }
    Ok(body.as_bytes().to_vec())
}

fn query_string(event: &Value) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    if let Some(multi) = event
        .get("multiValueQueryStringParameters")
        .and_then(Value::as_object)
    {
        for (key, values) in multi {
            for value in values.as_array().into_iter().flatten() {
                if let Some(text) = scalar_text(value) {
                    serializer.append_pair(key, &text);
                }
            }
        }
    } else if let Some(single) = event
        .get("queryStringParameters")
        .and_then(Value::as_object)
    {
        for (key, value) in single {
            if let Some(text) = scalar_text(value) {
                serializer.append_pair(key, &text);
            }
        }
    }
    serializer.finish()
}

/// Second-to-last `X-Forwarded-For` entry; the last one is the edge proxy.
fn remote_addr(headers: &Headers) -> String {
    let forwarded = headers.get("X-Forwarded-For").unwrap_or_default();
    let hops: Vec<&str> = forwarded.split(',').map(str::trim).collect();
    if hops.len() >= 2 {
        hops[hops.len() - 2].to_string()
    } else {
        "127.0.0.1".to_string()
    }
}

fn remote_user(request_context: &Value) -> Option<String> {
    let non_empty = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    match request_context.get("authorizer") {
        Some(authorizer) if !authorizer.is_null() => non_empty(authorizer.get("principalId")),
        _ => non_empty(request_context.pointer("/identity/userArn")),
    }
}

fn inject_context_headers(headers: &mut Headers, request_context: &Value, settings: &Settings) {
    for (header, dotted) in &settings.context_header_mappings {
        let found = dotted
            .split('.')
            .try_fold(request_context, |node, key| node.get(key));
        if let Some(text) = found.and_then(scalar_text) {
            headers.insert(header.clone(), text);
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn gateway_event(host: Option<&str>) -> Value {
        let mut headers = json!({"Content-Type": "application/json"});
        if let Some(host) = host {
            headers["Host"] = json!(host);
        }
        json!({
            "httpMethod": "GET",
            "path": "/items/caf%C3%A9",
            "headers": headers,
            "queryStringParameters": {"q": "a b"},
            "requestContext": {},
            "body": null,
        })
    }

    fn build(event: &Value, settings: &Settings) -> HapRequest {
        build_request(event, &InvocationContext::default(), settings).unwrap()
    }

    #[test]
    fn generated_domain_gets_stage_prefix() {
        let request = build(
            &gateway_event(Some("abc123.execute-api.us-east-1.amazonaws.com")),
            &Settings::default(),
        );
        assert_eq!(request.script_name, "/dev");
        assert_eq!(request.path, "/items/café");
        assert_eq!(request.query_string, "q=a+b");
        assert_eq!(request.scheme, "https");
    }

    #[test]
    fn custom_domain_has_no_prefix() {
        let request = build(&gateway_event(Some("shop.example.com")), &Settings::default());
        assert_eq!(request.script_name, "");
        assert_eq!(request.server_name, "shop.example.com");
    }

    #[test]
    fn console_test_follows_domain_setting() {
        let event = gateway_event(None);
        assert_eq!(build(&event, &Settings::default()).script_name, "/dev");

        let settings = Settings {
            domain: Some("shop.example.com".to_string()),
            ..Settings::default()
        };
        assert_eq!(build(&event, &settings).script_name, "");
    }

    #[test]
    fn base_path_is_stripped() {
        let mut event = gateway_event(Some("shop.example.com"));
        event["path"] = json!("/api/items");
        let settings = Settings {
            base_path: Some("api".to_string()),
            ..Settings::default()
        };
        let request = build(&event, &settings);
        assert_eq!(request.script_name, "/api");
        assert_eq!(request.path, "/items");
    }

    #[test]
    fn remote_user_requires_non_empty_principal() {
        let mut event = gateway_event(None);
        event["requestContext"] = json!({"authorizer": {"principalId": "user-7"}});
        assert_eq!(
            build(&event, &Settings::default()).remote_user.as_deref(),
            Some("user-7")
        );

        event["requestContext"] = json!({
            "authorizer": {"principalId": ""},
            "identity": {"userArn": "arn:aws:iam::1:user/x"},
        });
        assert_eq!(build(&event, &Settings::default()).remote_user, None);

        event["requestContext"] = json!({"identity": {"userArn": "arn:aws:iam::1:user/x"}});
        assert_eq!(
            build(&event, &Settings::default()).remote_user.as_deref(),
            Some("arn:aws:iam::1:user/x")
        );
    }

    #[test]
    fn base64_body_decoded_for_binary_methods() {
        let mut event = gateway_event(None);
        event["httpMethod"] = json!("POST");
        event["body"] = json!("aGVsbG8=");
        event["isBase64Encoded"] = json!(true);
        assert_eq!(build(&event, &Settings::default()).body, b"hello");

        let settings = Settings {
            binary_support: false,
            ..Settings::default()
        };
        assert_eq!(build(&event, &settings).body, b"aGVsbG8=");
    }

    #[test]
    fn invalid_base64_is_invalid_event() {
        let mut event = gateway_event(None);
        event["httpMethod"] = json!("PUT");
        event["body"] = json!("***");
        event["isBase64Encoded"] = json!(true);
        let err = build_request(&event, &InvocationContext::default(), &Settings::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEvent(_)));
    }

    #[test]
    fn multi_value_query_wins() {
        let mut event = gateway_event(None);
        event["multiValueQueryStringParameters"] = json!({"id": ["a", "b"]});
        assert_eq!(build(&event, &Settings::default()).query_string, "id=a&id=b");
    }

    #[test]
    fn remote_addr_is_client_hop() {
        let mut event = gateway_event(None);
        event["headers"]["X-Forwarded-For"] = json!("203.0.113.9, 198.51.100.1, 10.0.0.1");
        assert_eq!(build(&event, &Settings::default()).remote_addr, "198.51.100.1");
    }

    #[test]
    fn context_header_mappings_resolve_dotted_paths() {
        let mut event = gateway_event(None);
        event["requestContext"] = json!({"identity": {"sourceIp": "192.0.2.4"}, "requestId": "r-1"});
        let mut settings = Settings::default();
        settings
            .context_header_mappings
            .insert("X-Source-Ip".to_string(), "identity.sourceIp".to_string());
        settings
            .context_header_mappings
            .insert("X-Missing".to_string(), "identity.nope".to_string());
        let request = build(&event, &settings);
        assert_eq!(request.header("X-Source-Ip"), Some("192.0.2.4"));
        assert!(request.header("X-Missing").is_none());
    }

    #[test]
    fn elb_events_have_no_script_name() {
        let mut event = gateway_event(Some("internal-lb.amazonaws.com"));
        event["requestContext"] = json!({"elb": {"targetGroupArn": "arn:tg"}});
        assert!(is_elb_event(&event));
        assert_eq!(build(&event, &Settings::default()).script_name, "");
    }
}
