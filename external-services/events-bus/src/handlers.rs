use async_trait::async_trait;
use tracing::info;

use crate::error::HandlerError;
use crate::event::OrderEvent;

/// Business logic invoked for each decoded order event.
///
/// An `Err` leaves the message unacknowledged so the broker redelivers it;
/// handlers should therefore be idempotent on `event.id`.
#[async_trait]
pub trait OrderHandler: Send + Sync {
    async fn handle(&self, event: &OrderEvent) -> Result<(), HandlerError>;
}

/// Default handler: records the received order in the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingOrderHandler;

#[async_trait]
impl OrderHandler for LoggingOrderHandler {
    async fn handle(&self, event: &OrderEvent) -> Result<(), HandlerError> {
        info!(
            order_id = ?event.id,
            customer_id = event.customer_id.as_deref().unwrap_or_default(),
            amount = %event.amount,
            created_at = %event.created_at.to_rfc3339(),
            "Received order"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_logging_handler_accepts_any_event() {
        let handler = LoggingOrderHandler;
        assert!(handler.handle(&OrderEvent::default()).await.is_ok());
        assert!(handler
            .handle(&OrderEvent::new("c-7", Decimal::new(1999, 2)))
            .await
            .is_ok());
    }
}
