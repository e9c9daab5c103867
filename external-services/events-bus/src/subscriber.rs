// Per-message processing and the receive loop behind OrderSubscriber
use std::sync::Arc;

use config_engine::{keys, optional_setting, SettingsSource, DEFAULT_MAX_DELIVERY_COUNT};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::brokers::{Delivery, MessageReceiver};
use crate::error::{EventBusError, Result};
use crate::event::decode_order_event;
use crate::handlers::OrderHandler;

/// When a repeatedly failing message is moved to the dead-letter subject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    /// `None` retries forever
    pub max_deliveries: Option<u64>,
}

impl RedeliveryPolicy {
    pub fn bounded(max_deliveries: u64) -> Self {
        Self {
            max_deliveries: Some(max_deliveries),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            max_deliveries: None,
        }
    }

    /// Read `broker.max_delivery_count`; 0 disables dead-lettering
    pub fn from_settings(settings: &dyn SettingsSource) -> Result<Self> {
        let configured = optional_setting::<u64>(settings, keys::MAX_DELIVERY_COUNT)?;
        Ok(match configured.unwrap_or(DEFAULT_MAX_DELIVERY_COUNT) {
            0 => Self::unbounded(),
            max => Self::bounded(max),
        })
    }

    pub fn exhausted(&self, delivery_count: u64) -> bool {
        self.max_deliveries
            .is_some_and(|max| delivery_count >= max)
    }
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self::bounded(DEFAULT_MAX_DELIVERY_COUNT)
    }
}

/// What happened to a single delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Handled and acknowledged
    Completed,
    /// Undecodable body; acknowledged so it is not redelivered
    Dropped,
    /// Left unsettled; the broker will redeliver it
    Abandoned,
    /// Moved aside after too many failed deliveries
    DeadLettered,
}

/// Decode, dispatch and settle one delivery. Never fails: every error is
/// logged and turned into an outcome.
pub async fn process_message(
    handler: &dyn OrderHandler,
    policy: &RedeliveryPolicy,
    delivery: Delivery,
) -> MessageOutcome {
    let message_id = delivery.message_id().to_string();

    let event = match decode_order_event(&delivery.body) {
        Ok(event) => event,
        Err(e) => {
            warn!(message_id = %message_id, error = %e, "Dropping undecodable order message");
            return settle(&delivery, MessageOutcome::Dropped).await;
        }
    };

    match handler.handle(&event).await {
        Ok(()) => settle(&delivery, MessageOutcome::Completed).await,
        Err(e) if policy.exhausted(delivery.delivery_count) => {
            warn!(
                message_id = %message_id,
                delivery_count = delivery.delivery_count,
                error = %e,
                "Order handler failed on final delivery; dead-lettering"
            );
            let reason = format!("handler failed {} times: {e}", delivery.delivery_count);
            match delivery.dead_letter(&reason).await {
                Ok(()) => MessageOutcome::DeadLettered,
                Err(settle_error) => {
                    error!(message_id = %message_id, error = %settle_error, "Dead-lettering failed");
                    MessageOutcome::Abandoned
                }
            }
        }
        Err(e) => {
            error!(
                message_id = %message_id,
                delivery_count = delivery.delivery_count,
                error = %e,
                "Order handler failed; message left for redelivery"
            );
            MessageOutcome::Abandoned
        }
    }
}

async fn settle(delivery: &Delivery, outcome: MessageOutcome) -> MessageOutcome {
    match delivery.complete().await {
        Ok(()) => {
            debug!(message_id = %delivery.message_id(), ?outcome, "Message completed");
            outcome
        }
        Err(e) => {
            error!(message_id = %delivery.message_id(), error = %e, "Failed to complete message");
            MessageOutcome::Abandoned
        }
    }
}

/// Log a broker or processor error. The loop keeps running afterwards.
pub fn report_transport_error(entity_path: &str, error: &EventBusError) {
    match error {
        EventBusError::Transport {
            entity_path,
            operation,
            message,
        } => error!(
            entity_path = %entity_path,
            operation = %operation,
            error = %message,
            "Message processor error"
        ),
        other => error!(entity_path, error = %other, "Message processor error"),
    }
}

/// Receives and processes deliveries one at a time until cancelled
pub struct ProcessingLoop {
    receiver: Box<dyn MessageReceiver>,
    handler: Arc<dyn OrderHandler>,
    policy: RedeliveryPolicy,
    shutdown: CancellationToken,
}

impl ProcessingLoop {
    pub fn new(
        receiver: Box<dyn MessageReceiver>,
        handler: Arc<dyn OrderHandler>,
        policy: RedeliveryPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            receiver,
            handler,
            policy,
            shutdown,
        }
    }

    /// Runs until `shutdown` fires or the receiver ends. A message already
    /// being processed is finished before the loop checks for shutdown.
    pub async fn run(self) {
        let Self {
            mut receiver,
            handler,
            policy,
            shutdown,
        } = self;
        let entity_path = receiver.entity_path().to_string();
        info!(entity_path = %entity_path, "Message processing started");

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = receiver.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    process_message(handler.as_ref(), &policy, delivery).await;
                }
                Some(Err(e)) => report_transport_error(&entity_path, &e),
                None => {
                    warn!(entity_path = %entity_path, "Receiver closed by broker");
                    break;
                }
            }
        }

        if let Err(e) = receiver.close().await {
            report_transport_error(&entity_path, &e);
        }
        info!(entity_path = %entity_path, "Message processing stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brokers::Settlement;
    use crate::error::HandlerError;
    use crate::event::{encode_order_event, OrderEvent};
    use async_trait::async_trait;
    use bytes::Bytes;
    use rust_decimal::Decimal;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counts {
        completed: AtomicUsize,
        dead_lettered: AtomicUsize,
    }

    struct CountingSettlement(Arc<Counts>);

    #[async_trait]
    impl Settlement for CountingSettlement {
        async fn complete(&self) -> Result<()> {
            self.0.completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn dead_letter(&self, _reason: &str) -> Result<()> {
            self.0.dead_lettered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FixedHandler {
        fail: bool,
        calls: AtomicUsize,
    }

    impl FixedHandler {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OrderHandler for FixedHandler {
        async fn handle(&self, _event: &OrderEvent) -> std::result::Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(HandlerError::msg("downstream unavailable"))
            } else {
                Ok(())
            }
        }
    }

    fn delivery(body: impl Into<Bytes>, delivery_count: u64, counts: &Arc<Counts>) -> Delivery {
        Delivery::new(
            Some("m-1".to_string()),
            None,
            body.into(),
            delivery_count,
            Box::new(CountingSettlement(counts.clone())),
        )
    }

    fn valid_body() -> Vec<u8> {
        encode_order_event(&OrderEvent::new("c-1", Decimal::TEN)).unwrap()
    }

    #[tokio::test]
    async fn test_success_completes() {
        let counts = Arc::new(Counts::default());
        let handler = FixedHandler::new(false);

        let outcome = process_message(
            &handler,
            &RedeliveryPolicy::default(),
            delivery(valid_body(), 1, &counts),
        )
        .await;

        assert_eq!(outcome, MessageOutcome::Completed);
        assert_eq!(counts.completed.load(Ordering::SeqCst), 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_body_is_dropped_without_handler() {
        let counts = Arc::new(Counts::default());
        let handler = FixedHandler::new(false);

        let outcome = process_message(
            &handler,
            &RedeliveryPolicy::default(),
            delivery(&b"{oops"[..], 1, &counts),
        )
        .await;

        assert_eq!(outcome, MessageOutcome::Dropped);
        assert_eq!(counts.completed.load(Ordering::SeqCst), 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_failure_is_not_acknowledged() {
        let counts = Arc::new(Counts::default());
        let handler = FixedHandler::new(true);

        let outcome = process_message(
            &handler,
            &RedeliveryPolicy::bounded(3),
            delivery(valid_body(), 2, &counts),
        )
        .await;

        assert_eq!(outcome, MessageOutcome::Abandoned);
        assert_eq!(counts.completed.load(Ordering::SeqCst), 0);
        assert_eq!(counts.dead_lettered.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_final_failure_is_dead_lettered() {
        let counts = Arc::new(Counts::default());
        let handler = FixedHandler::new(true);

        let outcome = process_message(
            &handler,
            &RedeliveryPolicy::bounded(3),
            delivery(valid_body(), 3, &counts),
        )
        .await;

        assert_eq!(outcome, MessageOutcome::DeadLettered);
        assert_eq!(counts.dead_lettered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_policy_from_settings() {
        let mut settings = HashMap::new();
        assert_eq!(
            RedeliveryPolicy::from_settings(&settings).unwrap(),
            RedeliveryPolicy::bounded(DEFAULT_MAX_DELIVERY_COUNT)
        );

        settings.insert(keys::MAX_DELIVERY_COUNT.to_string(), "0".to_string());
        assert_eq!(
            RedeliveryPolicy::from_settings(&settings).unwrap(),
            RedeliveryPolicy::unbounded()
        );

        settings.insert(keys::MAX_DELIVERY_COUNT.to_string(), "lots".to_string());
        assert!(RedeliveryPolicy::from_settings(&settings).is_err());
    }

    #[test]
    fn test_unbounded_policy_never_exhausts() {
        assert!(!RedeliveryPolicy::unbounded().exhausted(u64::MAX));
        assert!(RedeliveryPolicy::bounded(1).exhausted(1));
    }
}
