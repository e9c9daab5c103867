//! Order API - HTTP front door for order events
//!
//! Accepts `POST /api/orders`, publishes each order through an
//! [`OrderEventPublisher`](events_bus::OrderEventPublisher) and answers
//! `202 Accepted` with the id the event was published under.

pub mod error;
pub mod handlers;
pub mod openapi;
pub mod routes;
pub mod server;

pub use error::*;
pub use server::OrderApiServer;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Create the application router with all routes and middleware
pub fn create_app(server: OrderApiServer) -> Router {
    routes::create_routes()
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(server)
}
