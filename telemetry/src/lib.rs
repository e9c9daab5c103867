//! Observability setup shared by the order services
//!
//! Both processes log through `tracing`. Development runs on a terminal get a
//! human readable, colored layer; everything else gets JSON lines so log
//! shippers can index the structured fields (`message_id`, `topic`,
//! `entity_path`, ...).
//!
//! # Example
//!
//! ```rust,no_run
//! use telemetry::{init_tracing, TracingConfig};
//!
//! init_tracing(&TracingConfig::new("order_api").verbose(true)).unwrap();
//! tracing::info!(topic = "orders", "Publisher ready");
//! ```

pub mod error;
pub mod logging;

pub use error::*;
pub use logging::*;
