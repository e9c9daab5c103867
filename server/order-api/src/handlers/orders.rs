use axum::{extract::State, http::StatusCode, Json};
use bytes::Bytes;
use events_bus::decode_order_event;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ApiError, ApiErrorResponse};
use crate::server::OrderApiServer;

/// Order submission. Property names are matched case-insensitively.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    /// Kept when supplied, generated otherwise
    pub id: Option<Uuid>,
    #[schema(example = "customer-42")]
    pub customer_id: Option<String>,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    #[schema(value_type = f64, example = 129.95)]
    pub amount: Decimal,
    /// Defaults to the time of publishing
    #[schema(value_type = Option<String>, example = "2024-01-15T10:30:00+02:00")]
    pub created_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderResponse {
    /// Identifier the order was published under
    pub id: Uuid,
}

/// Publish a new order
#[utoipa::path(
    post,
    path = "/api/orders",
    tag = "orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 202, description = "Order accepted for processing", body = CreateOrderResponse),
        (status = 400, description = "Body missing or not a valid order", body = ApiErrorResponse),
        (status = 502, description = "Broker did not confirm the publish", body = ApiErrorResponse)
    )
)]
pub async fn create_order(
    State(server): State<OrderApiServer>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateOrderResponse>), ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::missing_body());
    }

    let order = decode_order_event(&body)?;
    let id = server.publisher.publish(order).await?;

    info!(order_id = %id, "Order accepted");
    Ok((StatusCode::ACCEPTED, Json(CreateOrderResponse { id })))
}
