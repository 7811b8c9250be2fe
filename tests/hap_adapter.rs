//! HTTP events served end to end through the handler.

use std::collections::BTreeMap;
use std::sync::Arc;

use hapline::environment::InvocationContext;
use hapline::hap::{hosted_fn, merge_headers, CookieJar, HapResponse, PACKED_COOKIE_NAME};
use hapline::registry::{FunctionRegistry, Signature};
use hapline::settings::Settings;
use hapline::{BoxError, Error, LambdaHandler};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{json, Value};

/// Answers with a JSON echo of what the application saw, or with the
/// response the `X-Respond` header selects.
fn handler(settings: Settings) -> LambdaHandler {
    let app = hosted_fn(|request| async move {
        let respond = request.header("X-Respond").map(str::to_string);
        match respond.as_deref() {
            Some("png") => Ok(HapResponse::new(200)
                .with_header("Content-Type", "image/png")
                .with_body(vec![0x89, b'P', b'N', b'G'])),
            Some("cookies") => Ok(HapResponse::text(200, "set")
                .with_header("Set-Cookie", "sid=abc; Path=/; HttpOnly")
                .with_header("Set-Cookie", "theme=dark; Max-Age=3600")),
            Some("fail") => Err::<HapResponse, BoxError>("template missing".into()),
            _ => Ok(HapResponse::json(
                200,
                &json!({
                    "method": request.method,
                    "script_name": request.script_name,
                    "path": request.path,
                    "query": request.query_string,
                    "remote_user": request.remote_user,
                    "cookie": request.header("Cookie"),
                    "accept": request.header("Accept"),
                }),
            )),
        }
    });

    let mut registry = FunctionRegistry::new();
    registry
        .register("app.on_error", Signature::fixed(3), |args, _| async move {
            Ok(json!(args[1]["path"] == "/handled"))
        })
        .unwrap();
    LambdaHandler::new(Arc::new(settings), Arc::new(registry)).with_application(Arc::new(app))
}

fn gateway(path: &str, headers: Value) -> Value {
    json!({
        "httpMethod": "GET",
        "path": path,
        "headers": headers,
        "requestContext": {"stage": "dev"},
    })
}

async fn serve(handler: &LambdaHandler, event: Value) -> Value {
    handler
        .handle(event, InvocationContext::with_request_id("req-1"))
        .await
        .unwrap()
}

fn body_json(envelope: &Value) -> Value {
    serde_json::from_str(envelope["body"].as_str().unwrap()).unwrap()
}

#[tokio::test]
async fn gateway_request_reaches_application() {
    let mut event = gateway(
        "/orders",
        json!({"Host": "abc.execute-api.us-east-1.amazonaws.com", "accept": "text/html"}),
    );
    event["multiValueHeaders"] = json!({"accept": ["application/json"]});
    event["queryStringParameters"] = json!({"page": "2"});
    event["requestContext"]["authorizer"] = json!({"principalId": "user-9"});

    let envelope = serve(&handler(Settings::default()), event).await;
    assert_eq!(envelope["statusCode"], 200);
    assert_eq!(
        body_json(&envelope),
        json!({
            "method": "GET",
            "script_name": "/dev",
            "path": "/orders",
            "query": "page=2",
            "remote_user": "user-9",
            "cookie": null,
            "accept": "application/json, text/html",
        })
    );
    assert!(envelope.get("multiValueHeaders").is_some());
}

#[tokio::test]
async fn png_response_is_base64() {
    let envelope = serve(
        &handler(Settings::default()),
        gateway("/logo.png", json!({"X-Respond": "png"})),
    )
    .await;
    assert_eq!(envelope["isBase64Encoded"], json!(true));
    assert_eq!(envelope["body"], json!("iVBORw=="));
}

#[tokio::test]
async fn load_balancer_response_always_has_flag_and_description() {
    let mut event = gateway("/", json!({}));
    event["requestContext"] = json!({"elb": {"targetGroupArn": "arn:aws:elasticloadbalancing:tg"}});
    let envelope = serve(&handler(Settings::default()), event).await;
    assert_eq!(envelope["statusDescription"], json!("200 OK"));
    assert_eq!(envelope["isBase64Encoded"], json!(false));
    assert_eq!(body_json(&envelope)["script_name"], json!(""));
}

#[tokio::test]
async fn cookies_are_packed_and_unpacked_across_requests() {
    let handler = handler(Settings::default());
    let envelope = serve(&handler, gateway("/login", json!({"X-Respond": "cookies"}))).await;
    let set_cookie = envelope["headers"]["Set-Cookie"].as_str().unwrap().to_string();
    assert!(set_cookie.starts_with(&format!("{PACKED_COOKIE_NAME}=")));
    // `sid` is a session cookie, so the packed cookie is one too.
    assert!(!set_cookie.contains("Expires"));

    let packed = set_cookie.split(';').next().unwrap().to_string();
    let envelope = serve(
        &handler,
        gateway("/account", json!({"Cookie": format!("lang=en; {packed}")})),
    )
    .await;
    assert_eq!(
        body_json(&envelope)["cookie"],
        json!("lang=en; sid=abc; theme=dark")
    );
}

#[tokio::test]
async fn failures_become_500_unless_handler_declines() {
    let settings = Settings {
        exception_handler: Some("app.on_error".to_string()),
        ..Settings::default()
    };
    let handler = handler(settings);

    let envelope = serve(&handler, gateway("/handled", json!({"X-Respond": "fail"}))).await;
    assert_eq!(envelope["statusCode"], 500);
    assert!(body_json(&envelope).get("traceback").is_none());

    let err = handler
        .handle(
            gateway("/unhandled", json!({"X-Respond": "fail"})),
            InvocationContext::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HostedApplication(_)));
}

#[test]
fn cookie_jar_drops_expired_entries() {
    let now = chrono::Utc::now();
    let mut jar = CookieJar::new();
    jar.insert("fresh", "1", Some(now + chrono::Duration::hours(1)));
    jar.insert("stale", "2", Some(now - chrono::Duration::hours(1)));

    let mut unpacked = CookieJar::unpack(&jar.pack().unwrap()).unwrap();
    unpacked.filter_expired(now);
    assert_eq!(unpacked.get("fresh"), Some("1"));
    assert_eq!(unpacked.get("stale"), None);
}

proptest! {
    #[test]
    fn header_merge_law(
        multi in prop::collection::btree_map("[a-c]{1,2}", prop::collection::vec("[a-c0-2]{1,2}", 1..4), 0..6),
        singular in prop::collection::btree_map("[a-c]{1,2}", "[a-c0-2]{1,2}", 0..6),
    ) {
        let event = json!({"headers": &singular, "multiValueHeaders": &multi});
        let merged = merge_headers(&event, true);

        for (name, values) in &multi {
            let expected = match singular.get(name) {
                Some(single) => format!("{}, {}", values.join(", "), single),
                None => values.join(", "),
            };
            prop_assert_eq!(merged.get(name), Some(expected.as_str()));
        }
        for (name, single) in &singular {
            if !multi.contains_key(name) {
                prop_assert_eq!(merged.get(name), Some(single.as_str()));
            }
        }
    }

    #[test]
    fn cookie_pack_round_trip(cookies in prop::collection::btree_map("[A-Za-z0-9_]{1,12}", "[A-Za-z0-9%./+-]{0,24}", 0..12)) {
        let mut jar = CookieJar::new();
        for (name, value) in &cookies {
            jar.insert(name.clone(), value.clone(), None);
        }
        let unpacked = CookieJar::unpack(&jar.pack().unwrap()).unwrap();
        let round_tripped: BTreeMap<String, String> = unpacked
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();
        prop_assert_eq!(round_tripped, cookies);
    }
}
