use std::sync::Arc;

use async_trait::async_trait;
use config_engine::SettingsSource;
use tracing::{debug, info};
use uuid::Uuid;

use crate::brokers::{MessageBroker, OutboundMessage};
use crate::error::{EventBusError, Result};
use crate::event::{encode_order_event, now_with_offset, OrderEvent};
use crate::topic::{resolve_topic, ResolverSide};

/// Publishing seam used by the HTTP layer
#[async_trait]
pub trait OrderEventPublisher: Send + Sync {
    /// Publish `event` and return the id it was published under
    async fn publish(&self, event: OrderEvent) -> Result<Uuid>;
}

/// Sends order events to the configured topic.
///
/// Holds no mutable state, so one instance can serve concurrent requests.
#[derive(Clone)]
pub struct OrderPublisher {
    broker: Arc<dyn MessageBroker>,
    topic: String,
}

impl OrderPublisher {
    /// Resolve the topic from `settings`; fails if none is configured
    pub fn new(broker: Arc<dyn MessageBroker>, settings: &dyn SettingsSource) -> Result<Self> {
        let topic = resolve_topic(settings, ResolverSide::Publisher)?;
        info!(topic = %topic, broker = broker.name(), "Order publisher ready");
        Ok(Self { broker, topic })
    }

    pub fn with_topic(broker: Arc<dyn MessageBroker>, topic: impl Into<String>) -> Self {
        Self {
            broker,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl OrderEventPublisher for OrderPublisher {
    async fn publish(&self, event: OrderEvent) -> Result<Uuid> {
        let (id, event) = event.normalized(now_with_offset());
        let body = encode_order_event(&event)?;

        debug!(order_id = %id, topic = %self.topic, bytes = body.len(), "Sending order event");

        self.broker
            .send(&self.topic, OutboundMessage::json(id.to_string(), body))
            .await
            .map_err(|e| match e {
                EventBusError::Publish(_) => e,
                other => EventBusError::Publish(other.to_string()),
            })?;

        info!(order_id = %id, topic = %self.topic, "Published order event");
        Ok(id)
    }
}
