use axum::{
    routing::{get, post},
    Router,
};

use crate::{
    handlers::{health, orders},
    openapi,
    server::OrderApiServer,
};

pub mod paths {
    pub const HEALTH: &str = "/health";
    pub const ORDERS: &str = "/api/orders";
}

pub fn health_routes() -> Router<OrderApiServer> {
    Router::new().route(paths::HEALTH, get(health::health_check))
}

pub fn order_routes() -> Router<OrderApiServer> {
    Router::new().route(paths::ORDERS, post(orders::create_order))
}

/// All routes, without middleware or state
pub fn create_routes() -> Router<OrderApiServer> {
    Router::new()
        .merge(health_routes())
        .merge(order_routes())
        .merge(openapi::create_docs_routes())
}
