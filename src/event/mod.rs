//! Inbound event classification.
//!
//! The platform hands every invocation an untyped JSON event. An event can
//! satisfy several shapes at once (a direct command that also carries
//! `Records`, for instance), so classification tries each shape in a fixed
//! precedence order and the first that parses wins:
//!
//! | #  | Shape               | Marker                                   |
//! |----|---------------------|------------------------------------------|
//! | 1  | scheduled trigger   | `detail-type == "Scheduled Event"`       |
//! | 2  | direct command      | `command`                                |
//! | 3  | raw expression      | `raw_command`                            |
//! | 4  | management command  | `manage`                                 |
//! | 5  | records batch       | non-empty `Records`                      |
//! | 6  | bot intent          | `bot`                                    |
//! | 7  | token authorizer    | `type == "TOKEN"`                        |
//! | 8  | identity trigger    | `triggerSource`                          |
//! | 9  | log subscription    | `awslogs`                                |
//! | 10 | HTTP request        | `httpMethod`                             |
//! | 11 | anything else       | (ignored)                                |
//!
//! # Examples
//!
//! ```
//! use hapline::event::InboundEvent;
//! use serde_json::json;
//!
//! let event = json!({"command": "shop.jobs.rebuild", "Records": [{"s3": {}}]});
//! assert_eq!(
//!     InboundEvent::classify(&event),
//!     InboundEvent::Command { path: "shop.jobs.rebuild" }
//! );
//! ```

use serde_json::Value;

use crate::registry::is_truthy;

pub mod sources;

pub use sources::{resolve_record, RecordSource, RecordTarget};

/// One inbound event, borrowed from its JSON.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InboundEvent<'a> {
    /// Scheduled trigger; the target is encoded in the rule resource.
    Scheduled {
        /// First entry of `resources`, empty when absent.
        resource: &'a str,
    },
    /// Direct command naming a function path.
    Command {
        /// Function path or built-in command.
        path: &'a str,
    },
    /// Expression to evaluate in-process.
    RawCommand {
        /// Expression text.
        expression: &'a str,
    },
    /// Web-framework management command.
    Manage {
        /// Command as sent.
        command: &'a Value,
    },
    /// Batch of event-source records.
    Records {
        /// The records, never empty.
        records: &'a [Value],
    },
    /// Conversational bot intent.
    Bot {
        /// `currentIntent.name`, when present.
        intent: Option<&'a str>,
        /// `invocationSource`, when present.
        invocation_source: Option<&'a str>,
    },
    /// Token authorizer request.
    TokenAuthorizer,
    /// Identity-provider lifecycle trigger.
    CognitoTrigger {
        /// Trigger name.
        trigger: &'a str,
    },
    /// Log subscription delivery.
    LogSubscription,
    /// HTTP request for the hosted application.
    Http,
    /// No known shape.
    Unrecognized,
}

type Parser = for<'a> fn(&'a Value) -> Option<InboundEvent<'a>>;

/// Shape parsers in precedence order.
const PARSERS: [Parser; 10] = [
    parse_scheduled,
    parse_command,
    parse_raw_command,
    parse_manage,
    parse_records,
    parse_bot,
    parse_token_authorizer,
    parse_cognito_trigger,
    parse_log_subscription,
    parse_http,
];

impl<'a> InboundEvent<'a> {
    /// Classifies `event`; the first matching shape wins.
    pub fn classify(event: &'a Value) -> Self {
        PARSERS
            .iter()
            .find_map(|parse| parse(event))
            .unwrap_or(Self::Unrecognized)
    }

    /// Short name of the shape, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Scheduled { .. } => "scheduled",
            Self::Command { .. } => "command",
            Self::RawCommand { .. } => "raw_command",
            Self::Manage { .. } => "manage",
            Self::Records { .. } => "records",
            Self::Bot { .. } => "bot",
            Self::TokenAuthorizer => "token_authorizer",
            Self::CognitoTrigger { .. } => "cognito_trigger",
            Self::LogSubscription => "log_subscription",
            Self::Http => "http",
            Self::Unrecognized => "unrecognized",
        }
    }
}

/// Function path encoded in a scheduled rule resource.
///
/// The rule name ends in `-<function path>` and the resource ARN ends in
/// `/<rule name>`. Returns `None` when the suffix is not a dotted path.
pub fn scheduled_function(resource: &str) -> Option<&str> {
    let rule = resource.rsplit('/').next().unwrap_or_default();
    let suffix = rule.rsplit('-').next().unwrap_or_default();
    suffix.contains('.').then_some(suffix)
}

fn non_empty_str<'a>(event: &'a Value, key: &str) -> Option<&'a str> {
    event
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn parse_scheduled(event: &Value) -> Option<InboundEvent<'_>> {
    if event.get("detail-type").and_then(Value::as_str) != Some("Scheduled Event") {
        return None;
    }
    let resource = event
        .pointer("/resources/0")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some(InboundEvent::Scheduled { resource })
}

fn parse_command(event: &Value) -> Option<InboundEvent<'_>> {
    non_empty_str(event, "command").map(|path| InboundEvent::Command { path })
}

fn parse_raw_command(event: &Value) -> Option<InboundEvent<'_>> {
    non_empty_str(event, "raw_command").map(|expression| InboundEvent::RawCommand { expression })
}

fn parse_manage(event: &Value) -> Option<InboundEvent<'_>> {
    event
        .get("manage")
        .filter(|command| is_truthy(command))
        .map(|command| InboundEvent::Manage { command })
}

fn parse_records(event: &Value) -> Option<InboundEvent<'_>> {
    event
        .get("Records")
        .and_then(Value::as_array)
        .filter(|records| !records.is_empty())
        .map(|records| InboundEvent::Records { records })
}

fn parse_bot(event: &Value) -> Option<InboundEvent<'_>> {
    if !event.get("bot").is_some_and(is_truthy) {
        return None;
    }
    Some(InboundEvent::Bot {
        intent: event.pointer("/currentIntent/name").and_then(Value::as_str),
        invocation_source: event.get("invocationSource").and_then(Value::as_str),
    })
}

fn parse_token_authorizer(event: &Value) -> Option<InboundEvent<'_>> {
    (event.get("type").and_then(Value::as_str) == Some("TOKEN")).then_some(InboundEvent::TokenAuthorizer)
}

fn parse_cognito_trigger(event: &Value) -> Option<InboundEvent<'_>> {
    non_empty_str(event, "triggerSource").map(|trigger| InboundEvent::CognitoTrigger { trigger })
}

fn parse_log_subscription(event: &Value) -> Option<InboundEvent<'_>> {
    event
        .get("awslogs")
        .filter(|logs| is_truthy(logs))
        .map(|_| InboundEvent::LogSubscription)
}

fn parse_http(event: &Value) -> Option<InboundEvent<'_>> {
    non_empty_str(event, "httpMethod").map(|_| InboundEvent::Http)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use test_case::test_case;

    #[test_case(json!({"detail-type": "Scheduled Event", "command": "a.b"}), "scheduled" ; "scheduled before command")]
    #[test_case(json!({"command": "a.b", "raw_command": "1+1"}), "command" ; "command before raw")]
    #[test_case(json!({"raw_command": "1+1", "manage": "check"}), "raw_command" ; "raw before manage")]
    #[test_case(json!({"manage": ["migrate"], "Records": [{}]}), "manage" ; "manage before records")]
    #[test_case(json!({"Records": [{}], "bot": {"name": "b"}}), "records" ; "records before bot")]
    #[test_case(json!({"bot": {"name": "b"}, "type": "TOKEN"}), "bot" ; "bot before authorizer")]
    #[test_case(json!({"type": "TOKEN", "triggerSource": "PreSignUp_SignUp"}), "token_authorizer" ; "authorizer before cognito")]
    #[test_case(json!({"triggerSource": "PreSignUp_SignUp", "awslogs": {"data": "x"}}), "cognito_trigger" ; "cognito before logs")]
    #[test_case(json!({"awslogs": {"data": "x"}, "httpMethod": "GET"}), "log_subscription" ; "logs before http")]
    #[test_case(json!({"httpMethod": "GET"}), "http" ; "http")]
    #[test_case(json!({"source": "aws.events"}), "unrecognized" ; "unknown")]
    fn precedence(event: Value, kind: &str) {
        assert_eq!(InboundEvent::classify(&event).kind(), kind);
    }

    #[test]
    fn empty_markers_do_not_match() {
        let event = json!({"command": "", "Records": [], "manage": null, "httpMethod": "GET"});
        assert_eq!(InboundEvent::classify(&event), InboundEvent::Http);
    }

    #[test]
    fn bot_fields_are_extracted() {
        let event = json!({
            "bot": {"name": "OrderBot"},
            "currentIntent": {"name": "OrderFlowers"},
            "invocationSource": "DialogCodeHook",
        });
        assert_eq!(
            InboundEvent::classify(&event),
            InboundEvent::Bot {
                intent: Some("OrderFlowers"),
                invocation_source: Some("DialogCodeHook"),
            }
        );
    }

    #[test_case("arn:aws:events:us-east-1:1:rule/shop-prod-shop.jobs.nightly", Some("shop.jobs.nightly") ; "dotted suffix")]
    #[test_case("arn:aws:events:us-east-1:1:rule/shop-prod-hapline.keep_warm_callback", Some("hapline.keep_warm_callback") ; "keep warm")]
    #[test_case("arn:aws:events:us-east-1:1:rule/some-other-rule", None ; "no dot")]
    #[test_case("", None ; "empty")]
    fn scheduled_suffix(resource: &str, expected: Option<&str>) {
        assert_eq!(scheduled_function(resource), expected);
    }
}
