// Broker abstraction shared by the publisher and the processing loop
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use config_engine::BrokerSettings;
use tracing::info;

use crate::error::{EventBusError, Result};
use crate::memory::{InMemoryBroker, InMemoryConfig};
use crate::nats::{NatsConfig, NatsJetStreamBroker};

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// A message ready to be handed to the broker
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Stable identifier; brokers de-duplicate repeated submissions on it
    pub message_id: String,
    pub content_type: String,
    pub body: Bytes,
}

impl OutboundMessage {
    pub fn json(message_id: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            message_id: message_id.into(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            body: body.into(),
        }
    }
}

/// Processor options applied when a receiver is opened
#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    /// Unsettled deliveries allowed at once
    pub max_in_flight: usize,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self { max_in_flight: 1 }
    }
}

/// Process-wide broker connection. Implementations must be safe to share
/// between the publisher and the subscriber without extra locking.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Submit a message; resolves once the broker has confirmed receipt.
    async fn send(&self, topic: &str, message: OutboundMessage) -> Result<()>;

    /// Open a processor on `subscription`; resolves once delivery has begun.
    async fn open_receiver(
        &self,
        topic: &str,
        subscription: &str,
        options: ReceiverOptions,
    ) -> Result<Box<dyn MessageReceiver>>;
}

/// Pull side of a subscription
#[async_trait]
pub trait MessageReceiver: Send {
    /// `<topic>/subscriptions/<subscription>`, used in error reports
    fn entity_path(&self) -> &str;

    /// Next delivery, a transport error, or `None` once the broker closed the receiver
    async fn next(&mut self) -> Option<Result<Delivery>>;

    /// Stop delivering and release the processor
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Broker-specific acknowledgement of a single delivery
#[async_trait]
pub trait Settlement: Send + Sync {
    async fn complete(&self) -> Result<()>;
    async fn dead_letter(&self, reason: &str) -> Result<()>;
}

/// A received message. Dropping it unsettled leaves it outstanding, and the
/// broker redelivers it once its ack wait expires.
pub struct Delivery {
    pub message_id: Option<String>,
    pub content_type: Option<String>,
    pub body: Bytes,
    /// 1 on first delivery
    pub delivery_count: u64,
    settlement: Box<dyn Settlement>,
}

impl Delivery {
    pub fn new(
        message_id: Option<String>,
        content_type: Option<String>,
        body: Bytes,
        delivery_count: u64,
        settlement: Box<dyn Settlement>,
    ) -> Self {
        Self {
            message_id,
            content_type,
            body,
            delivery_count,
            settlement,
        }
    }

    pub fn message_id(&self) -> &str {
        self.message_id.as_deref().unwrap_or("<none>")
    }

    /// Acknowledge: the broker will not deliver this message again
    pub async fn complete(&self) -> Result<()> {
        self.settlement.complete().await
    }

    /// Move the message aside; it will not be delivered on this subscription again
    pub async fn dead_letter(&self, reason: &str) -> Result<()> {
        self.settlement.dead_letter(reason).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message_id", &self.message_id)
            .field("content_type", &self.content_type)
            .field("body_len", &self.body.len())
            .field("delivery_count", &self.delivery_count)
            .finish_non_exhaustive()
    }
}

/// Create the broker connection named by the connection string's endpoint.
///
/// `memory://` selects the in-process broker; `nats://` and `tls://` connect
/// to NATS JetStream.
pub async fn connect_broker(settings: &BrokerSettings) -> Result<Arc<dyn MessageBroker>> {
    let endpoint = settings.connection.endpoint();
    let scheme = endpoint
        .split_once("://")
        .map(|(scheme, _)| scheme.to_ascii_lowercase())
        .unwrap_or_default();

    match scheme.as_str() {
        "memory" => {
            info!(endpoint, "Using in-memory event broker");
            Ok(Arc::new(InMemoryBroker::new(InMemoryConfig::from_settings(settings))))
        }
        "nats" | "tls" => {
            let broker = NatsJetStreamBroker::connect(NatsConfig::from_settings(settings)).await?;
            Ok(Arc::new(broker))
        }
        other => Err(EventBusError::Configuration(format!(
            "unsupported broker endpoint scheme '{other}' in {endpoint}"
        ))),
    }
}
