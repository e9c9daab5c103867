use std::sync::Arc;
use std::time::Instant;

use events_bus::OrderEventPublisher;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct OrderApiServer {
    /// Publisher for accepted orders
    pub publisher: Arc<dyn OrderEventPublisher>,
    /// Topic orders are published to, reported by the health check
    pub topic: String,
    /// Process start, for uptime reporting
    pub started_at: Instant,
}

impl OrderApiServer {
    pub fn new(publisher: Arc<dyn OrderEventPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            started_at: Instant::now(),
        }
    }
}
