use std::collections::HashMap;
use std::time::Duration;

use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, Consumer},
    AckKind,
};
use async_trait::async_trait;
use config_engine::BrokerSettings;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::brokers::{
    Delivery, MessageBroker, MessageReceiver, OutboundMessage, ReceiverOptions, Settlement,
};
use crate::error::{ErrorSource, EventBusError, Result};

/// Header JetStream de-duplicates on
pub const MESSAGE_ID_HEADER: &str = "Nats-Msg-Id";
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";
pub const DEAD_LETTER_REASON_HEADER: &str = "Dead-Letter-Reason";
/// Appended to the message id of a dead-letter copy. The copy shares the
/// stream with the original, so it must not reuse the original's id.
pub const DEAD_LETTER_ID_SUFFIX: &str = ".deadletter";

/// NATS JetStream connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub server_url: String,
    /// Optional auth token
    pub token: Option<String>,
    /// Client name reported to the server
    pub connection_name: String,
    /// Stream holding the order topic and its dead-letter subject
    pub stream_name: String,
    /// Redelivery delay for unacknowledged messages
    pub ack_wait: Duration,
    /// Window in which repeated message ids are dropped
    pub duplicate_window: Duration,
    /// Appended to the topic to form the dead-letter subject
    pub dead_letter_suffix: String,
}

impl NatsConfig {
    pub fn from_settings(settings: &BrokerSettings) -> Self {
        Self {
            server_url: settings.connection.endpoint().to_string(),
            token: settings.connection.token().map(str::to_string),
            stream_name: settings.stream_name.clone(),
            ack_wait: settings.ack_wait,
            duplicate_window: settings.duplicate_window,
            dead_letter_suffix: settings.dead_letter_suffix.clone(),
            ..Self::default()
        }
    }

    pub fn dead_letter_subject(&self, topic: &str) -> String {
        format!("{topic}{}", self.dead_letter_suffix)
    }
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            server_url: "nats://localhost:4222".to_string(),
            token: None,
            connection_name: "order-events".to_string(),
            stream_name: "ORDERS".to_string(),
            ack_wait: Duration::from_secs(30),
            duplicate_window: Duration::from_secs(120),
            dead_letter_suffix: ".deadletter".to_string(),
        }
    }
}

/// NATS JetStream broker: topic = subject, subscription = durable pull consumer
pub struct NatsJetStreamBroker {
    jetstream: jetstream::Context,
    /// Streams already created or looked up, by topic
    streams: RwLock<HashMap<String, jetstream::stream::Stream>>,
    config: NatsConfig,
}

impl NatsJetStreamBroker {
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        info!(server_url = %config.server_url, "Connecting to NATS JetStream");

        let options = match &config.token {
            Some(token) => async_nats::ConnectOptions::with_token(token.clone()),
            None => async_nats::ConnectOptions::new(),
        }
        .name(&config.connection_name);

        let client = options
            .connect(config.server_url.as_str())
            .await
            .map_err(|e| EventBusError::BrokerConnection(e.to_string()))?;

        info!("Connected to NATS JetStream");

        Ok(Self {
            jetstream: jetstream::new(client),
            streams: RwLock::new(HashMap::new()),
            config,
        })
    }

    /// Get or create the stream that stores `topic` and its dead letters
    async fn ensure_stream(&self, topic: &str) -> Result<jetstream::stream::Stream> {
        if let Some(stream) = self.streams.read().await.get(topic) {
            return Ok(stream.clone());
        }

        let stream_config = jetstream::stream::Config {
            name: self.config.stream_name.clone(),
            subjects: vec![topic.to_string(), self.config.dead_letter_subject(topic)],
            storage: jetstream::stream::StorageType::File,
            duplicate_window: self.config.duplicate_window,
            ..Default::default()
        };

        let stream = self
            .jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| EventBusError::BrokerConnection(e.to_string()))?;

        debug!(stream = %self.config.stream_name, topic, "JetStream stream ready");
        self.streams
            .write()
            .await
            .insert(topic.to_string(), stream.clone());
        Ok(stream)
    }
}

#[async_trait]
impl MessageBroker for NatsJetStreamBroker {
    fn name(&self) -> &'static str {
        "nats-jetstream"
    }

    async fn send(&self, topic: &str, message: OutboundMessage) -> Result<()> {
        self.ensure_stream(topic)
            .await
            .map_err(|e| EventBusError::Publish(e.to_string()))?;

        let mut headers = async_nats::HeaderMap::new();
        headers.insert(MESSAGE_ID_HEADER, message.message_id.as_str());
        headers.insert(CONTENT_TYPE_HEADER, message.content_type.as_str());

        let ack = self
            .jetstream
            .publish_with_headers(topic.to_string(), headers, message.body)
            .await
            .map_err(|e| EventBusError::Publish(e.to_string()))?
            .await
            .map_err(|e| EventBusError::Publish(e.to_string()))?;

        if ack.duplicate {
            debug!(topic, message_id = %message.message_id, "Broker reported duplicate message id");
        }
        Ok(())
    }

    async fn open_receiver(
        &self,
        topic: &str,
        subscription: &str,
        options: ReceiverOptions,
    ) -> Result<Box<dyn MessageReceiver>> {
        let stream = self
            .ensure_stream(topic)
            .await
            .map_err(|e| EventBusError::Startup(e.to_string()))?;

        let consumer: Consumer<pull::Config> = stream
            .get_or_create_consumer(
                subscription,
                pull::Config {
                    durable_name: Some(subscription.to_string()),
                    filter_subject: topic.to_string(),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: self.config.ack_wait,
                    max_ack_pending: i64::try_from(options.max_in_flight).unwrap_or(1),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| EventBusError::Startup(e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| EventBusError::Startup(e.to_string()))?;

        info!(topic, subscription, "JetStream consumer pulling");

        Ok(Box::new(NatsReceiver {
            messages,
            entity_path: format!("{topic}/subscriptions/{subscription}"),
            jetstream: self.jetstream.clone(),
            dead_letter_subject: self.config.dead_letter_subject(topic),
        }))
    }
}

struct NatsReceiver {
    messages: pull::Stream,
    entity_path: String,
    jetstream: jetstream::Context,
    dead_letter_subject: String,
}

fn header_value(message: &jetstream::Message, name: &str) -> Option<String> {
    message
        .headers
        .as_ref()
        .and_then(|headers| headers.get(name))
        .map(|value| value.as_str().to_string())
}

#[async_trait]
impl MessageReceiver for NatsReceiver {
    fn entity_path(&self) -> &str {
        &self.entity_path
    }

    async fn next(&mut self) -> Option<Result<Delivery>> {
        let message = match self.messages.next().await? {
            Ok(message) => message,
            Err(e) => {
                return Some(Err(EventBusError::Transport {
                    entity_path: self.entity_path.clone(),
                    operation: ErrorSource::Receive,
                    message: e.to_string(),
                }))
            }
        };

        let delivery_count = message
            .info()
            .map(|info| u64::try_from(info.delivered).unwrap_or(1))
            .unwrap_or(1);
        let message_id = header_value(&message, MESSAGE_ID_HEADER);
        let content_type = header_value(&message, CONTENT_TYPE_HEADER);
        let body = message.payload.clone();

        Some(Ok(Delivery::new(
            message_id,
            content_type,
            body,
            delivery_count,
            Box::new(NatsSettlement {
                message,
                jetstream: self.jetstream.clone(),
                dead_letter_subject: self.dead_letter_subject.clone(),
                entity_path: self.entity_path.clone(),
            }),
        )))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        // Dropping the pull stream stops fetching; the durable consumer stays.
        debug!(entity_path = %self.entity_path, "JetStream receiver closed");
        drop(self);
        Ok(())
    }
}

/// Headers for the dead-letter copy of a message: the original headers, a
/// message id distinct from the original's and the failure reason.
fn dead_letter_headers(
    original: Option<&async_nats::HeaderMap>,
    reason: &str,
) -> async_nats::HeaderMap {
    let mut headers = original.cloned().unwrap_or_default();
    let original_id = headers
        .get(MESSAGE_ID_HEADER)
        .map(|value| value.as_str().to_string());
    if let Some(id) = original_id {
        headers.insert(
            MESSAGE_ID_HEADER,
            format!("{id}{DEAD_LETTER_ID_SUFFIX}").as_str(),
        );
    }
    headers.insert(DEAD_LETTER_REASON_HEADER, reason);
    headers
}

struct NatsSettlement {
    message: jetstream::Message,
    jetstream: jetstream::Context,
    dead_letter_subject: String,
    entity_path: String,
}

impl NatsSettlement {
    fn transport_error(&self, operation: ErrorSource, message: String) -> EventBusError {
        EventBusError::Transport {
            entity_path: self.entity_path.clone(),
            operation,
            message,
        }
    }
}

#[async_trait]
impl Settlement for NatsSettlement {
    async fn complete(&self) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| self.transport_error(ErrorSource::Complete, e.to_string()))
    }

    async fn dead_letter(&self, reason: &str) -> Result<()> {
        let headers = dead_letter_headers(self.message.headers.as_ref(), reason);

        let ack = self
            .jetstream
            .publish_with_headers(
                self.dead_letter_subject.clone(),
                headers,
                self.message.payload.clone(),
            )
            .await
            .map_err(|e| self.transport_error(ErrorSource::DeadLetter, e.to_string()))?
            .await
            .map_err(|e| self.transport_error(ErrorSource::DeadLetter, e.to_string()))?;

        // A duplicate ack means nothing new was stored; keep the original.
        if ack.duplicate {
            return Err(self.transport_error(
                ErrorSource::DeadLetter,
                format!(
                    "dead-letter copy on {} was rejected as a duplicate",
                    self.dead_letter_subject
                ),
            ));
        }

        self.message
            .ack_with(AckKind::Term)
            .await
            .map_err(|e| self.transport_error(ErrorSource::DeadLetter, e.to_string()))
    }
}
