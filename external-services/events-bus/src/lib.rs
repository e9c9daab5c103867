//! Order event publish/subscribe over a durable message broker
//!
//! This crate carries order events from the HTTP edge to background
//! consumers:
//! - Canonical JSON codec for [`OrderEvent`] (case-insensitive on decode)
//! - Topic and subscription resolution from layered settings
//! - [`OrderPublisher`] for fire-and-confirm publishing with de-duplication ids
//! - [`OrderSubscriber`] with at-least-once processing, explicit acknowledgement
//!   and dead-lettering after repeated handler failures
//! - Broker backends: NATS JetStream and an in-process broker for local runs
//!
//! # Delivery semantics
//!
//! A message is acknowledged only after the [`OrderHandler`] returns `Ok`.
//! Undecodable bodies are acknowledged and dropped so they cannot poison
//! the subscription. Handler failures leave the message for redelivery.
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use config_engine::keys;
//! use events_bus::{
//!     InMemoryBroker, LoggingOrderHandler, OrderEvent, OrderEventPublisher, OrderPublisher,
//!     OrderSubscriber,
//! };
//! use rust_decimal::Decimal;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut settings = HashMap::new();
//!     settings.insert(keys::TOPIC_NAME.to_string(), "orders".to_string());
//!     settings.insert(keys::SUBSCRIPTION_NAME.to_string(), "audit".to_string());
//!
//!     let broker = Arc::new(InMemoryBroker::default());
//!     let subscriber = OrderSubscriber::new(broker.clone(), &settings, Arc::new(LoggingOrderHandler))?;
//!     let publisher = OrderPublisher::new(broker, &settings)?;
//!
//!     let token = CancellationToken::new();
//!     subscriber.start(&token).await?;
//!
//!     let id = publisher.publish(OrderEvent::new("customer-1", Decimal::new(4999, 2))).await?;
//!     println!("published order {id}");
//!
//!     subscriber.stop(&token).await?;
//!     Ok(())
//! }
//! ```

pub mod brokers;
pub mod error;
pub mod event;
pub mod handlers;
pub mod lifecycle;
pub mod memory;
pub mod nats;
pub mod publisher;
pub mod subscriber;
pub mod topic;

pub use brokers::*;
pub use error::*;
pub use event::*;
pub use handlers::*;
pub use lifecycle::*;
pub use memory::*;
pub use nats::*;
pub use publisher::*;
pub use subscriber::*;
pub use topic::*;
