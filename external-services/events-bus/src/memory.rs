// In-process broker with at-least-once delivery, for local runs and tests
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use config_engine::BrokerSettings;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::brokers::{
    Delivery, MessageBroker, MessageReceiver, OutboundMessage, ReceiverOptions, Settlement,
};
use crate::error::{EventBusError, Result};

#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// How long a delivery may stay unsettled before it is redelivered
    pub ack_wait: Duration,
    /// Repeated message ids inside this window are dropped
    pub duplicate_window: Duration,
}

impl InMemoryConfig {
    pub fn from_settings(settings: &BrokerSettings) -> Self {
        Self {
            ack_wait: settings.ack_wait,
            duplicate_window: settings.duplicate_window,
        }
    }
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            ack_wait: Duration::from_secs(30),
            duplicate_window: Duration::from_secs(120),
        }
    }
}

/// A message as stored by the broker
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub message_id: String,
    pub content_type: String,
    pub body: Bytes,
    /// Times this message has been handed to a receiver
    pub delivery_count: u64,
}

#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message: StoredMessage,
    pub reason: String,
}

struct InFlight {
    message: StoredMessage,
    deadline: Instant,
}

struct SubscriptionState {
    pending: VecDeque<StoredMessage>,
    /// Keyed by delivery sequence, so ordering survives redelivery
    in_flight: HashMap<u64, InFlight>,
    acknowledged: Vec<StoredMessage>,
    dead_lettered: Vec<DeadLetter>,
    next_sequence: u64,
    notify: Arc<Notify>,
}

impl SubscriptionState {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
            acknowledged: Vec::new(),
            dead_lettered: Vec::new(),
            next_sequence: 0,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Put expired deliveries back at the front, oldest first
    fn requeue_expired(&mut self, now: Instant) {
        let mut expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(sequence, _)| *sequence)
            .collect();
        expired.sort_unstable_by(|a, b| b.cmp(a));

        for sequence in expired {
            if let Some(entry) = self.in_flight.remove(&sequence) {
                debug!(message_id = %entry.message.message_id, "Ack wait expired; redelivering");
                self.pending.push_front(entry.message);
            }
        }
    }

    fn earliest_deadline(&self) -> Option<Instant> {
        self.in_flight.values().map(|entry| entry.deadline).min()
    }
}

#[derive(Default)]
struct TopicState {
    subscriptions: HashMap<String, SubscriptionState>,
    recent_ids: HashMap<String, Instant>,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicState>,
}

impl BrokerState {
    fn subscription_mut(&mut self, topic: &str, subscription: &str) -> Option<&mut SubscriptionState> {
        self.topics
            .get_mut(topic)
            .and_then(|t| t.subscriptions.get_mut(subscription))
    }

    fn subscription(&self, topic: &str, subscription: &str) -> Option<&SubscriptionState> {
        self.topics
            .get(topic)
            .and_then(|t| t.subscriptions.get(subscription))
    }
}

/// Topics fan out to every subscription that existed when a message was
/// sent; each subscription is an independent cursor.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    config: InMemoryConfig,
}

impl InMemoryBroker {
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            config,
        }
    }

    /// Create a subscription so it receives messages sent from now on
    pub fn ensure_subscription(&self, topic: &str, subscription: &str) {
        let mut state = self.state.lock();
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .subscriptions
            .entry(subscription.to_string())
            .or_insert_with(SubscriptionState::new);
    }

    /// Messages completed on the subscription, in acknowledgement order
    pub fn acknowledged(&self, topic: &str, subscription: &str) -> Vec<StoredMessage> {
        self.state
            .lock()
            .subscription(topic, subscription)
            .map(|s| s.acknowledged.clone())
            .unwrap_or_default()
    }

    pub fn dead_lettered(&self, topic: &str, subscription: &str) -> Vec<DeadLetter> {
        self.state
            .lock()
            .subscription(topic, subscription)
            .map(|s| s.dead_lettered.clone())
            .unwrap_or_default()
    }

    /// Messages waiting for delivery, not counting those in flight
    pub fn pending(&self, topic: &str, subscription: &str) -> Vec<StoredMessage> {
        self.state
            .lock()
            .subscription(topic, subscription)
            .map(|s| s.pending.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Pending plus delivered-but-unsettled
    pub fn outstanding(&self, topic: &str, subscription: &str) -> usize {
        self.state
            .lock()
            .subscription(topic, subscription)
            .map_or(0, |s| s.pending.len() + s.in_flight.len())
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn send(&self, topic: &str, message: OutboundMessage) -> Result<()> {
        let mut state = self.state.lock();
        let topic_state = state.topics.entry(topic.to_string()).or_default();

        let now = Instant::now();
        let window = self.config.duplicate_window;
        topic_state
            .recent_ids
            .retain(|_, seen_at| now.duration_since(*seen_at) < window);
        if topic_state.recent_ids.contains_key(&message.message_id) {
            debug!(topic, message_id = %message.message_id, "Duplicate message suppressed");
            return Ok(());
        }
        topic_state.recent_ids.insert(message.message_id.clone(), now);

        if topic_state.subscriptions.is_empty() {
            debug!(topic, message_id = %message.message_id, "No subscriptions; message discarded");
        }

        let stored = StoredMessage {
            message_id: message.message_id,
            content_type: message.content_type,
            body: message.body,
            delivery_count: 0,
        };
        for subscription in topic_state.subscriptions.values_mut() {
            subscription.pending.push_back(stored.clone());
            subscription.notify.notify_one();
        }
        Ok(())
    }

    async fn open_receiver(
        &self,
        topic: &str,
        subscription: &str,
        options: ReceiverOptions,
    ) -> Result<Box<dyn MessageReceiver>> {
        if options.max_in_flight == 0 {
            return Err(EventBusError::Startup(
                "max_in_flight must be at least 1".to_string(),
            ));
        }
        self.ensure_subscription(topic, subscription);

        let notify = self
            .state
            .lock()
            .subscription(topic, subscription)
            .map(|s| s.notify.clone())
            .ok_or_else(|| EventBusError::Startup(format!("subscription {subscription} vanished")))?;

        Ok(Box::new(InMemoryReceiver {
            state: self.state.clone(),
            topic: topic.to_string(),
            subscription: subscription.to_string(),
            entity_path: format!("{topic}/subscriptions/{subscription}"),
            notify,
            max_in_flight: options.max_in_flight,
            ack_wait: self.config.ack_wait,
        }))
    }
}

struct InMemoryReceiver {
    state: Arc<Mutex<BrokerState>>,
    topic: String,
    subscription: String,
    entity_path: String,
    notify: Arc<Notify>,
    max_in_flight: usize,
    ack_wait: Duration,
}

impl InMemoryReceiver {
    /// Hand out the next delivery, or report when to look again
    fn poll_delivery(&self) -> std::result::Result<Delivery, Option<Instant>> {
        let mut state = self.state.lock();
        let Some(subscription) = state.subscription_mut(&self.topic, &self.subscription) else {
            return Err(None);
        };

        let now = Instant::now();
        subscription.requeue_expired(now);

        if subscription.in_flight.len() < self.max_in_flight {
            if let Some(mut message) = subscription.pending.pop_front() {
                message.delivery_count += 1;
                let sequence = subscription.next_sequence;
                subscription.next_sequence += 1;
                subscription.in_flight.insert(
                    sequence,
                    InFlight {
                        message: message.clone(),
                        deadline: now + self.ack_wait,
                    },
                );

                return Ok(Delivery::new(
                    Some(message.message_id),
                    Some(message.content_type),
                    message.body,
                    message.delivery_count,
                    Box::new(InMemorySettlement {
                        state: self.state.clone(),
                        topic: self.topic.clone(),
                        subscription: self.subscription.clone(),
                        sequence,
                    }),
                ));
            }
        }

        Err(subscription.earliest_deadline())
    }
}

#[async_trait]
impl MessageReceiver for InMemoryReceiver {
    fn entity_path(&self) -> &str {
        &self.entity_path
    }

    async fn next(&mut self) -> Option<Result<Delivery>> {
        loop {
            match self.poll_delivery() {
                Ok(delivery) => return Some(Ok(delivery)),
                Err(Some(deadline)) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                Err(None) => self.notify.notified().await,
            }
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        debug!(entity_path = %self.entity_path, "In-memory receiver closed");
        Ok(())
    }
}

struct InMemorySettlement {
    state: Arc<Mutex<BrokerState>>,
    topic: String,
    subscription: String,
    sequence: u64,
}

impl InMemorySettlement {
    fn take_in_flight(&self, state: &mut BrokerState) -> Result<(StoredMessage, Arc<Notify>)> {
        let subscription = state
            .subscription_mut(&self.topic, &self.subscription)
            .ok_or_else(|| EventBusError::Settlement("subscription no longer exists".to_string()))?;
        let entry = subscription.in_flight.remove(&self.sequence).ok_or_else(|| {
            EventBusError::Settlement("delivery lock lost; message was redelivered".to_string())
        })?;
        Ok((entry.message, subscription.notify.clone()))
    }
}

#[async_trait]
impl Settlement for InMemorySettlement {
    async fn complete(&self) -> Result<()> {
        let mut state = self.state.lock();
        let (message, notify) = self.take_in_flight(&mut state)?;
        if let Some(subscription) = state.subscription_mut(&self.topic, &self.subscription) {
            subscription.acknowledged.push(message);
        }
        notify.notify_one();
        Ok(())
    }

    async fn dead_letter(&self, reason: &str) -> Result<()> {
        let mut state = self.state.lock();
        let (message, notify) = self.take_in_flight(&mut state)?;
        if let Some(subscription) = state.subscription_mut(&self.topic, &self.subscription) {
            subscription.dead_lettered.push(DeadLetter {
                message,
                reason: reason.to_string(),
            });
        }
        notify.notify_one();
        Ok(())
    }
}
