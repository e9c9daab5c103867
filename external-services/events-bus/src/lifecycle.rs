// Start/stop lifecycle of the order subscriber
use std::fmt;
use std::sync::Arc;

use config_engine::SettingsSource;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::brokers::{MessageBroker, ReceiverOptions};
use crate::error::{EventBusError, Result};
use crate::handlers::OrderHandler;
use crate::subscriber::{ProcessingLoop, RedeliveryPolicy};
use crate::topic::{resolve_subscription, resolve_topic, ResolverSide};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Long-running consumer of order events on one topic subscription.
///
/// Construction validates configuration only; nothing touches the broker
/// until [`start`](Self::start). An instance can be started once.
pub struct OrderSubscriber {
    broker: Arc<dyn MessageBroker>,
    topic: String,
    subscription: String,
    handler: Arc<dyn OrderHandler>,
    policy: RedeliveryPolicy,
    options: ReceiverOptions,
    state: Arc<watch::Sender<ProcessorState>>,
    shutdown: CancellationToken,
    processor: Mutex<Option<JoinHandle<()>>>,
}

impl OrderSubscriber {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        settings: &dyn SettingsSource,
        handler: Arc<dyn OrderHandler>,
    ) -> Result<Self> {
        let topic = resolve_topic(settings, ResolverSide::Subscriber)?;
        let subscription = resolve_subscription(settings)?;
        let policy = RedeliveryPolicy::from_settings(settings)?;

        info!(
            topic = %topic,
            subscription = %subscription,
            max_deliveries = ?policy.max_deliveries,
            "Order subscriber configured"
        );

        Ok(Self {
            broker,
            topic,
            subscription,
            handler,
            policy,
            options: ReceiverOptions::default(),
            state: Arc::new(watch::channel(ProcessorState::Stopped).0),
            shutdown: CancellationToken::new(),
            processor: Mutex::new(None),
        })
    }

    pub fn with_policy(mut self, policy: RedeliveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    pub fn state(&self) -> ProcessorState {
        *self.state.borrow()
    }

    /// Receiver of every state transition
    pub fn state_changes(&self) -> watch::Receiver<ProcessorState> {
        self.state.subscribe()
    }

    /// Resolves once the subscriber is `Stopped`, whether through
    /// [`stop`](Self::stop) or because the broker closed the receiver.
    pub async fn stopped(&self) {
        let mut changes = self.state.subscribe();
        // Err only if the sender is dropped, and `self` holds it.
        let _ = changes
            .wait_for(|state| *state == ProcessorState::Stopped)
            .await;
    }

    fn set_state(&self, state: ProcessorState) {
        self.state.send_replace(state);
    }

    /// Open the subscription and begin processing. Returns once delivery
    /// has begun; messages are handled on a background task.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        let mut processor = self.processor.lock().await;
        if processor.is_some() || self.shutdown.is_cancelled() {
            return Err(EventBusError::Startup(
                "subscriber has already been started".to_string(),
            ));
        }

        self.set_state(ProcessorState::Starting);
        info!(topic = %self.topic, subscription = %self.subscription, "Starting order subscriber");

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EventBusError::Startup("start cancelled".to_string())),
            _ = self.shutdown.cancelled() => Err(EventBusError::Startup("subscriber stopped during start".to_string())),
            opened = self.broker.open_receiver(&self.topic, &self.subscription, self.options.clone()) => {
                opened.map_err(|e| match e {
                    EventBusError::Startup(_) => e,
                    other => EventBusError::Startup(other.to_string()),
                })
            }
        };

        let receiver = match opened {
            Ok(receiver) => receiver,
            Err(e) => {
                self.set_state(ProcessorState::Stopped);
                return Err(e);
            }
        };

        let processing = ProcessingLoop::new(
            receiver,
            self.handler.clone(),
            self.policy,
            self.shutdown.child_token(),
        );
        self.set_state(ProcessorState::Running);
        info!(topic = %self.topic, subscription = %self.subscription, "Order subscriber running");

        let state = self.state.clone();
        let shutdown = self.shutdown.clone();
        let subscription = self.subscription.clone();
        *processor = Some(tokio::spawn(async move {
            processing.run().await;
            if !shutdown.is_cancelled() {
                warn!(subscription = %subscription, "Message processing ended without a stop request");
                state.send_replace(ProcessorState::Stopped);
            }
        }));
        Ok(())
    }

    /// Stop receiving and wait for the message in progress to finish.
    ///
    /// Safe to call before `start` and more than once. If `cancel` fires
    /// first the processing task is aborted instead of drained.
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<()> {
        self.shutdown.cancel();

        let mut processor = self.processor.lock().await;
        let Some(mut task) = processor.take() else {
            self.set_state(ProcessorState::Stopped);
            return Ok(());
        };

        self.set_state(ProcessorState::Stopping);
        info!(topic = %self.topic, subscription = %self.subscription, "Stopping order subscriber");

        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = cancel.cancelled() => {
                warn!(subscription = %self.subscription, "Stop cancelled; aborting message processing");
                task.abort();
                self.set_state(ProcessorState::Stopped);
                return Ok(());
            }
        };

        self.set_state(ProcessorState::Stopped);
        if let Err(e) = joined {
            if e.is_panic() {
                return Err(EventBusError::Startup(format!(
                    "message processing task panicked: {e}"
                )));
            }
        }
        info!(subscription = %self.subscription, "Order subscriber stopped");
        Ok(())
    }
}

impl fmt::Debug for OrderSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderSubscriber")
            .field("topic", &self.topic)
            .field("subscription", &self.subscription)
            .field("policy", &self.policy)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brokers::{Delivery, MessageReceiver, OutboundMessage};
    use crate::handlers::LoggingOrderHandler;
    use crate::memory::InMemoryBroker;
    use async_trait::async_trait;
    use config_engine::keys;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Broker whose receivers open after `open_delay` and are closed at once
    struct ClosingBroker {
        open_delay: Duration,
    }

    struct ClosedReceiver;

    #[async_trait]
    impl MessageReceiver for ClosedReceiver {
        fn entity_path(&self) -> &str {
            "orders/subscriptions/audit"
        }

        async fn next(&mut self) -> Option<Result<Delivery>> {
            None
        }

        async fn close(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl MessageBroker for ClosingBroker {
        fn name(&self) -> &'static str {
            "closing"
        }

        async fn send(&self, _topic: &str, _message: OutboundMessage) -> Result<()> {
            Ok(())
        }

        async fn open_receiver(
            &self,
            _topic: &str,
            _subscription: &str,
            _options: ReceiverOptions,
        ) -> Result<Box<dyn MessageReceiver>> {
            tokio::time::sleep(self.open_delay).await;
            Ok(Box::new(ClosedReceiver))
        }
    }

    fn subscriber_on(broker: Arc<dyn MessageBroker>) -> OrderSubscriber {
        OrderSubscriber::new(
            broker,
            &settings(&[(keys::TOPIC_NAME, "orders"), (keys::SUBSCRIPTION_NAME, "audit")]),
            Arc::new(LoggingOrderHandler),
        )
        .unwrap()
    }

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn subscriber(broker: InMemoryBroker) -> OrderSubscriber {
        subscriber_on(Arc::new(broker))
    }

    #[test]
    fn test_new_requires_subscription() {
        let result = OrderSubscriber::new(
            Arc::new(InMemoryBroker::default()),
            &settings(&[(keys::TOPIC_NAME, "orders")]),
            Arc::new(LoggingOrderHandler),
        );
        assert!(matches!(result, Err(EventBusError::Configuration(_))));
    }

    #[test]
    fn test_topic_from_entity_path() {
        let subscriber = OrderSubscriber::new(
            Arc::new(InMemoryBroker::default()),
            &settings(&[
                (keys::CONNECTION_STRING, "Endpoint=memory://local;EntityPath=orders"),
                (keys::SUBSCRIPTION_NAME, "audit"),
            ]),
            Arc::new(LoggingOrderHandler),
        )
        .unwrap();
        assert_eq!(subscriber.topic(), "orders");
        assert_eq!(subscriber.state(), ProcessorState::Stopped);
    }

    #[tokio::test]
    async fn test_start_then_stop_transitions() {
        let subscriber = subscriber(InMemoryBroker::default());
        let mut changes = subscriber.state_changes();
        let token = CancellationToken::new();

        subscriber.start(&token).await.unwrap();
        assert_eq!(subscriber.state(), ProcessorState::Running);
        assert!(changes.has_changed().unwrap());
        assert_eq!(*changes.borrow_and_update(), ProcessorState::Running);

        subscriber.stop(&token).await.unwrap();
        assert_eq!(subscriber.state(), ProcessorState::Stopped);
    }

    #[tokio::test]
    async fn test_second_start_fails() {
        let subscriber = subscriber(InMemoryBroker::default());
        let token = CancellationToken::new();

        subscriber.start(&token).await.unwrap();
        assert!(matches!(
            subscriber.start(&token).await,
            Err(EventBusError::Startup(_))
        ));
        subscriber.stop(&token).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_start_leaves_stopped() {
        let subscriber = subscriber(InMemoryBroker::default());
        let token = CancellationToken::new();
        token.cancel();

        assert!(matches!(
            subscriber.start(&token).await,
            Err(EventBusError::Startup(_))
        ));
        assert_eq!(subscriber.state(), ProcessorState::Stopped);
        subscriber.stop(&CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let subscriber = subscriber(InMemoryBroker::default());
        let token = CancellationToken::new();

        subscriber.stop(&token).await.unwrap();
        subscriber.stop(&token).await.unwrap();
        assert_eq!(subscriber.state(), ProcessorState::Stopped);
        assert!(subscriber.start(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_during_start_ends_stopped() {
        let subscriber = Arc::new(subscriber_on(Arc::new(ClosingBroker {
            open_delay: Duration::from_millis(200),
        })));

        let starting = {
            let subscriber = subscriber.clone();
            tokio::spawn(async move { subscriber.start(&CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(subscriber.state(), ProcessorState::Starting);

        subscriber.stop(&CancellationToken::new()).await.unwrap();
        assert!(matches!(
            starting.await.unwrap(),
            Err(EventBusError::Startup(_))
        ));
        assert_eq!(subscriber.state(), ProcessorState::Stopped);

        subscriber.stop(&CancellationToken::new()).await.unwrap();
        assert_eq!(subscriber.state(), ProcessorState::Stopped);
    }

    #[tokio::test]
    async fn test_receiver_closed_by_broker_reports_stopped() {
        let subscriber = subscriber_on(Arc::new(ClosingBroker {
            open_delay: Duration::ZERO,
        }));
        let token = CancellationToken::new();

        subscriber.start(&token).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), subscriber.stopped())
            .await
            .unwrap();
        assert_eq!(subscriber.state(), ProcessorState::Stopped);

        subscriber.stop(&token).await.unwrap();
        assert_eq!(subscriber.state(), ProcessorState::Stopped);
        assert!(subscriber.start(&token).await.is_err());
    }
}
