//! [`HapResponse`] to platform response envelope.
//!
//! The envelope mirrors the shape of the inbound event: `headers` is
//! emitted when the event carried `headers`, `multiValueHeaders` when it
//! carried `multiValueHeaders`. Load-balancer responses always carry
//! `isBase64Encoded` and `statusDescription`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Value};

use super::request::is_elb_event;
use super::HapResponse;

/// Which optional envelope fields the inbound event calls for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvelopeShape {
    /// Emit single-value `headers`.
    pub headers: bool,
    /// Emit `multiValueHeaders`.
    pub multi_value_headers: bool,
    /// The load balancer is the caller.
    pub elb: bool,
}

impl EnvelopeShape {
    /// Shape matching `event`.
    ///
    /// An event with neither header map still gets single-value `headers`.
    pub fn of(event: &Value) -> Self {
        let multi_value_headers = event.get("multiValueHeaders").is_some();
        let headers = event.get("headers").is_some() || !multi_value_headers;
        Self {
            headers,
            multi_value_headers,
            elb: is_elb_event(event),
        }
    }
}

/// `true` for media types passed through as text.
pub fn is_textual(media_type: &str) -> bool {
    media_type.starts_with("text/") || media_type == "application/json" || media_type.ends_with("+json")
}

/// Shapes `response` into the envelope the platform expects.
pub fn to_envelope(response: &HapResponse, shape: EnvelopeShape, binary_support: bool) -> Value {
    let mut envelope = Map::new();
    envelope.insert("statusCode".to_string(), Value::from(response.status));
    if shape.elb {
        envelope.insert(
            "statusDescription".to_string(),
            Value::String(response.status_line()),
        );
    }

    if shape.headers {
        let mut headers = Map::new();
        for (name, value) in response.headers.iter() {
            headers.insert(name.to_string(), Value::String(value.to_string()));
        }
        envelope.insert("headers".to_string(), Value::Object(headers));
    }
    if shape.multi_value_headers {
        let mut headers = Map::new();
        for name in response.headers.names() {
            let values = response
                .headers
                .get_all(name)
                .iter()
                .cloned()
                .map(Value::String)
                .collect();
            headers.insert(name.to_string(), Value::Array(values));
        }
        envelope.insert("multiValueHeaders".to_string(), Value::Object(headers));
    }

    let textual = response.media_type().as_deref().map_or(true, is_textual);
    let encode = binary_support && !textual && !response.body.is_empty();
    let body = if encode {
        STANDARD.encode(&response.body)
    } else {
        String::from_utf8_lossy(&response.body).into_owned()
    };
    envelope.insert("body".to_string(), Value::String(body));

    if encode || shape.elb {
        envelope.insert("isBase64Encoded".to_string(), Value::Bool(encode));
    }

    Value::Object(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const GATEWAY: EnvelopeShape = EnvelopeShape {
        headers: true,
        multi_value_headers: false,
        elb: false,
    };

    #[test]
    fn png_is_base64_encoded() {
        let response = HapResponse::new(200)
            .with_header("Content-Type", "image/png")
            .with_body(vec![0x89, b'P', b'N', b'G']);
        let envelope = to_envelope(&response, GATEWAY, true);
        assert_eq!(envelope["isBase64Encoded"], json!(true));
        assert_eq!(envelope["body"], json!("iVBORw=="));
    }

    #[test]
    fn json_passes_through_as_text() {
        let response = HapResponse::json(200, &json!({"ok": true}));
        let envelope = to_envelope(&response, GATEWAY, true);
        assert_eq!(envelope["body"], json!("{\"ok\":true}"));
        assert!(envelope.get("isBase64Encoded").is_none());
    }

    #[test]
    fn binary_support_off_never_encodes() {
        let response = HapResponse::new(200)
            .with_header("Content-Type", "application/octet-stream")
            .with_body(b"raw".to_vec());
        let envelope = to_envelope(&response, GATEWAY, false);
        assert_eq!(envelope["body"], json!("raw"));
        assert!(envelope.get("isBase64Encoded").is_none());
    }

    #[test]
    fn elb_always_has_flag_and_description() {
        let response = HapResponse::text(404, "missing");
        let shape = EnvelopeShape {
            elb: true,
            ..GATEWAY
        };
        let envelope = to_envelope(&response, shape, true);
        assert_eq!(envelope["isBase64Encoded"], json!(false));
        assert_eq!(envelope["statusDescription"], json!("404 Not Found"));
    }

    #[test]
    fn multi_value_headers_follow_event_shape() {
        let response = HapResponse::new(200)
            .with_header("Set-Cookie", "a=1")
            .with_header("Set-Cookie", "b=2");
        let event = json!({"httpMethod": "GET", "multiValueHeaders": {}});
        let envelope = to_envelope(&response, EnvelopeShape::of(&event), true);
        assert_eq!(envelope["multiValueHeaders"]["Set-Cookie"], json!(["a=1", "b=2"]));
        assert!(envelope.get("headers").is_none());

        let event = json!({"httpMethod": "GET", "headers": {}});
        let envelope = to_envelope(&response, EnvelopeShape::of(&event), true);
        assert!(envelope.get("multiValueHeaders").is_none());
        assert_eq!(envelope["headers"]["Set-Cookie"], json!("b=2"));
    }
}
