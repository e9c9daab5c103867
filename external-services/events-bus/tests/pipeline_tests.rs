use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use config_engine::keys;
use events_bus::{
    now_with_offset, HandlerError, InMemoryBroker, InMemoryConfig, MessageBroker, OrderEvent,
    OrderEventPublisher, OrderHandler, OrderPublisher, OrderSubscriber, OutboundMessage,
    RedeliveryPolicy,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const TOPIC: &str = "orders";
const SUBSCRIPTION: &str = "fulfilment";

fn settings() -> HashMap<String, String> {
    let mut settings = HashMap::new();
    settings.insert(keys::TOPIC_NAME.to_string(), TOPIC.to_string());
    settings.insert(keys::SUBSCRIPTION_NAME.to_string(), SUBSCRIPTION.to_string());
    settings
}

fn broker_with_ack_wait(ack_wait: Duration) -> InMemoryBroker {
    InMemoryBroker::new(InMemoryConfig {
        ack_wait,
        duplicate_window: Duration::from_secs(60),
    })
}

/// Forwards every event it sees to a channel
struct ChannelHandler(mpsc::UnboundedSender<OrderEvent>);

#[async_trait]
impl OrderHandler for ChannelHandler {
    async fn handle(&self, event: &OrderEvent) -> Result<(), HandlerError> {
        self.0
            .send(event.clone())
            .map_err(|_| HandlerError::msg("test receiver dropped"))
    }
}

/// Always fails, counting attempts
#[derive(Default)]
struct FailingHandler {
    attempts: AtomicUsize,
    seen_ids: Mutex<Vec<Option<Uuid>>>,
}

#[async_trait]
impl OrderHandler for FailingHandler {
    async fn handle(&self, event: &OrderEvent) -> Result<(), HandlerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.seen_ids.lock().push(event.id);
        Err(HandlerError::msg("inventory service unavailable"))
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_published_order_reaches_handler() {
    let broker = Arc::new(InMemoryBroker::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscriber =
        OrderSubscriber::new(broker.clone(), &settings(), Arc::new(ChannelHandler(tx))).unwrap();
    let publisher = OrderPublisher::new(broker.clone(), &settings()).unwrap();
    let token = CancellationToken::new();
    subscriber.start(&token).await.unwrap();

    let before = now_with_offset();
    let id = publisher
        .publish(OrderEvent::new("customer-9", Decimal::new(4999, 2)))
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.id, Some(id));
    assert_eq!(received.customer_id.as_deref(), Some("customer-9"));
    assert_eq!(received.amount, Decimal::new(4999, 2));
    assert!(received.created_at >= before);
    assert!(received.created_at - before < chrono::Duration::seconds(5));

    subscriber.stop(&token).await.unwrap();
    wait_until(|| broker.acknowledged(TOPIC, SUBSCRIPTION).len() == 1).await;
}

#[tokio::test]
async fn test_caller_timestamp_survives_the_pipeline() {
    let broker = Arc::new(InMemoryBroker::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscriber =
        OrderSubscriber::new(broker.clone(), &settings(), Arc::new(ChannelHandler(tx))).unwrap();
    let publisher = OrderPublisher::new(broker.clone(), &settings()).unwrap();
    let token = CancellationToken::new();
    subscriber.start(&token).await.unwrap();

    let created_at = DateTime::parse_from_rfc3339("2024-06-30T23:59:59.125-07:00").unwrap();
    publisher
        .publish(OrderEvent::new("customer-1", Decimal::ONE).with_created_at(created_at))
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.created_at, created_at);
    assert_eq!(received.created_at.offset(), created_at.offset());

    subscriber.stop(&token).await.unwrap();
}

#[tokio::test]
async fn test_generated_ids_are_unique() {
    let broker = Arc::new(InMemoryBroker::default());
    broker.ensure_subscription(TOPIC, SUBSCRIPTION);
    let publisher = OrderPublisher::new(broker.clone(), &settings()).unwrap();

    let mut ids = std::collections::HashSet::new();
    for _ in 0..100 {
        let id = publisher.publish(OrderEvent::default()).await.unwrap();
        assert!(ids.insert(id), "duplicate id {id}");
    }
    assert_eq!(broker.pending(TOPIC, SUBSCRIPTION).len(), 100);
}

#[tokio::test]
async fn test_malformed_message_is_dropped_once() {
    let broker = Arc::new(InMemoryBroker::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscriber =
        OrderSubscriber::new(broker.clone(), &settings(), Arc::new(ChannelHandler(tx))).unwrap();
    let token = CancellationToken::new();
    subscriber.start(&token).await.unwrap();

    broker
        .send(TOPIC, OutboundMessage::json("garbage", &b"{\"id\": 12"[..]))
        .await
        .unwrap();

    wait_until(|| broker.acknowledged(TOPIC, SUBSCRIPTION).len() == 1).await;
    assert_eq!(broker.outstanding(TOPIC, SUBSCRIPTION), 0);
    assert!(rx.try_recv().is_err());

    subscriber.stop(&token).await.unwrap();
}

#[tokio::test]
async fn test_failing_handler_never_acknowledges() {
    let broker = Arc::new(broker_with_ack_wait(Duration::from_millis(20)));
    let handler = Arc::new(FailingHandler::default());
    let subscriber = OrderSubscriber::new(broker.clone(), &settings(), handler.clone())
        .unwrap()
        .with_policy(RedeliveryPolicy::unbounded());
    let publisher = OrderPublisher::new(broker.clone(), &settings()).unwrap();
    let token = CancellationToken::new();
    subscriber.start(&token).await.unwrap();

    let id = publisher.publish(OrderEvent::default()).await.unwrap();
    wait_until(|| handler.attempts.load(Ordering::SeqCst) >= 3).await;
    subscriber.stop(&token).await.unwrap();

    assert!(broker.acknowledged(TOPIC, SUBSCRIPTION).is_empty());
    assert!(broker.dead_lettered(TOPIC, SUBSCRIPTION).is_empty());
    assert!(handler.seen_ids.lock().iter().all(|seen| *seen == Some(id)));
}

#[tokio::test]
async fn test_exhausted_message_is_dead_lettered() {
    let broker = Arc::new(broker_with_ack_wait(Duration::from_millis(20)));
    let handler = Arc::new(FailingHandler::default());
    let mut config = settings();
    config.insert(keys::MAX_DELIVERY_COUNT.to_string(), "2".to_string());
    let subscriber = OrderSubscriber::new(broker.clone(), &config, handler.clone()).unwrap();
    let publisher = OrderPublisher::new(broker.clone(), &config).unwrap();
    let token = CancellationToken::new();
    subscriber.start(&token).await.unwrap();

    publisher.publish(OrderEvent::default()).await.unwrap();
    wait_until(|| broker.dead_lettered(TOPIC, SUBSCRIPTION).len() == 1).await;
    subscriber.stop(&token).await.unwrap();

    assert_eq!(handler.attempts.load(Ordering::SeqCst), 2);
    let dead = broker.dead_lettered(TOPIC, SUBSCRIPTION);
    assert_eq!(dead[0].message.delivery_count, 2);
    assert!(dead[0].reason.contains("inventory service unavailable"));
}

#[tokio::test]
async fn test_stop_finishes_in_flight_then_leaves_rest() {
    let broker = Arc::new(InMemoryBroker::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscriber =
        OrderSubscriber::new(broker.clone(), &settings(), Arc::new(ChannelHandler(tx))).unwrap();
    let publisher = OrderPublisher::new(broker.clone(), &settings()).unwrap();
    let token = CancellationToken::new();
    subscriber.start(&token).await.unwrap();

    publisher.publish(OrderEvent::default()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    subscriber.stop(&token).await.unwrap();

    publisher.publish(OrderEvent::default()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(rx.try_recv().is_err());
    assert_eq!(broker.pending(TOPIC, SUBSCRIPTION).len(), 1);
}
