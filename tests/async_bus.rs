//! Round trips through the async task bus: enqueue on one invocation,
//! receipt on the next.

use std::sync::Arc;

use chrono::{Duration, Utc};
use hapline::environment::{InvocationContext, PlatformEnvironment};
use hapline::registry::{FunctionRegistry, Signature};
use hapline::settings::Settings;
use hapline::store::{get_async_response, AsyncStatus, InMemoryResponseStore};
use hapline::task::transport::{
    InMemoryBroker, LambdaTransport, SentMessage, SnsTransport, SqsTransport, StaticAccount,
};
use hapline::task::{AsyncDispatcher, Dispatch, TaskMessage, TaskRouter, TransportKind};
use hapline::{DeliveryError, Error, LambdaHandler};
use pretty_assertions::assert_eq;
use serde_json::{json, Map, Value};

struct Bus {
    broker: Arc<InMemoryBroker>,
    dispatcher: Arc<AsyncDispatcher>,
    store: Arc<InMemoryResponseStore>,
    handler: LambdaHandler,
}

fn bus() -> Bus {
    let mut registry = FunctionRegistry::new();
    registry
        .register("shop.math.add", Signature::variadic(0), |args, kwargs| async move {
            let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
            let bonus = kwargs.get("bonus").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(sum + bonus))
        })
        .unwrap();
    let registry = Arc::new(registry);

    let environment = PlatformEnvironment::on_platform("shop-prod", "us-east-1");
    let broker = Arc::new(InMemoryBroker::new());
    let account = Arc::new(StaticAccount::new("123456789012"));
    let settings = Settings {
        async_response_table: Some("shop-async".to_string()),
        async_transport: TransportKind::Sqs,
        ..Settings::default()
    };

    let dispatcher = Arc::new(
        AsyncDispatcher::new(environment.clone(), registry.clone())
            .configured(&settings)
            .with_transport(Arc::new(LambdaTransport::new(broker.clone(), environment.clone())))
            .with_transport(Arc::new(SnsTransport::new(
                broker.clone(),
                account.clone(),
                environment.clone(),
            )))
            .with_transport(Arc::new(SqsTransport::new(
                broker.clone(),
                account,
                environment,
            ))),
    );
    let store = Arc::new(InMemoryResponseStore::new());
    let router = TaskRouter::new(registry.clone())
        .with_dispatcher(dispatcher.clone())
        .with_response_store(store.clone());
    let handler = LambdaHandler::new(Arc::new(settings), registry).with_task_router(router);

    Bus {
        broker,
        dispatcher,
        store,
        handler,
    }
}

/// The event the platform delivers for `sent`.
fn delivery_event(sent: &SentMessage) -> Value {
    match sent.transport {
        TransportKind::Lambda => serde_json::from_str(&sent.body).unwrap(),
        TransportKind::Sns => json!({"Records": [{
            "EventSource": "aws:sns",
            "Sns": {"TopicArn": sent.destination, "Message": sent.body},
        }]}),
        TransportKind::Sqs => json!({"Records": [{
            "eventSource": "aws:sqs",
            "eventSourceARN": "arn:aws:sqs:us-east-1:123456789012:shop-prod-async",
            "body": sent.body,
        }]}),
    }
}

fn kwargs(bonus: i64) -> Map<String, Value> {
    let mut kwargs = Map::new();
    kwargs.insert("bonus".to_string(), json!(bonus));
    kwargs
}

#[tokio::test]
async fn every_transport_round_trips() {
    let bus = bus();
    for kind in [TransportKind::Lambda, TransportKind::Sns, TransportKind::Sqs] {
        let outcome = bus
            .dispatcher
            .task("shop.math.add")
            .via(kind)
            .enqueue(vec![json!(1), json!(2)], kwargs(10))
            .await
            .unwrap();
        assert!(matches!(outcome, Dispatch::Sent { .. }));

        let sent = bus.broker.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].transport, kind);

        let result = bus
            .handler
            .handle(delivery_event(&sent[0]), InvocationContext::default())
            .await
            .unwrap();
        let expected = match kind {
            TransportKind::Sqs => json!([13]),
            _ => json!(13),
        };
        assert_eq!(result, expected, "{kind}");
    }
}

#[tokio::test]
async fn captured_response_is_readable() {
    let bus = bus();
    let outcome = bus
        .dispatcher
        .task("shop.math.add")
        .capture_response()
        .enqueue(vec![json!(20), json!(22)], Map::new())
        .await
        .unwrap();
    let response_id = outcome.response_id().unwrap().to_string();
    assert!(get_async_response(bus.store.as_ref(), &response_id)
        .await
        .unwrap()
        .is_none());

    let sent = bus.broker.drain();
    bus.handler
        .handle(delivery_event(&sent[0]), InvocationContext::default())
        .await
        .unwrap();

    let stored = get_async_response(bus.store.as_ref(), &response_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, AsyncStatus::Complete);
    assert_eq!(stored.response, json!(42));
}

#[tokio::test]
async fn long_delay_is_clamped_then_requeued_with_same_deadline() {
    let bus = bus();
    let execute_at = Utc::now() + Duration::hours(1);
    bus.dispatcher
        .task("shop.math.add")
        .at(execute_at)
        .enqueue(vec![json!(1)], Map::new())
        .await
        .unwrap();

    let first = bus.broker.drain();
    assert_eq!(first[0].delay_seconds, 900);

    // The queue delivers early; the router sends it back with the ceiling.
    let result = bus
        .handler
        .handle(delivery_event(&first[0]), InvocationContext::default())
        .await
        .unwrap();
    assert_eq!(result, json!([null]));

    let second = bus.broker.drain();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].delay_seconds, 900);
    let before = TaskMessage::decode(first[0].body.as_bytes()).unwrap();
    let after = TaskMessage::decode(second[0].body.as_bytes()).unwrap();
    assert_eq!(
        before.async_context.unwrap().execute_datetime,
        after.async_context.unwrap().execute_datetime
    );
}

#[tokio::test]
async fn delivery_failures_reach_the_caller() {
    let bus = bus();
    bus.broker.fail_next("throttled");
    let err = bus
        .dispatcher
        .task("shop.math.add")
        .enqueue(vec![], Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Delivery(DeliveryError::Client { .. })));
    assert!(bus.broker.sent().is_empty());
}

#[tokio::test]
async fn oversized_payload_is_rejected_before_sending() {
    let bus = bus();
    let err = bus
        .dispatcher
        .task("shop.math.add")
        .enqueue(vec![json!("x".repeat(300_000))], Map::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Delivery(DeliveryError::PayloadTooLarge { limit: 256_000, .. })
    ));
    assert!(bus.broker.sent().is_empty());
}

#[tokio::test]
async fn off_platform_runs_inline() {
    let mut registry = FunctionRegistry::new();
    registry
        .register("shop.math.double", Signature::fixed(1), |args, _| async move {
            Ok(json!(args[0].as_i64().unwrap_or(0) * 2))
        })
        .unwrap();
    let broker = Arc::new(InMemoryBroker::new());
    let dispatcher = AsyncDispatcher::new(PlatformEnvironment::local(), Arc::new(registry))
        .with_transport(Arc::new(LambdaTransport::new(
            broker.clone(),
            PlatformEnvironment::local(),
        )));

    let outcome = dispatcher
        .task("shop.math.double")
        .enqueue(vec![json!(21)], Map::new())
        .await
        .unwrap();
    assert_eq!(outcome, Dispatch::Inline(json!(42)));
    assert!(broker.sent().is_empty());
}
