use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::server::OrderApiServer;

pub const SWAGGER_UI_PATH: &str = "/swagger-ui";
pub const OPENAPI_JSON_PATH: &str = "/api-docs/openapi.json";

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::health::health_check,
        crate::handlers::orders::create_order,
    ),
    components(
        schemas(
            crate::handlers::health::HealthResponse,
            crate::handlers::orders::CreateOrderRequest,
            crate::handlers::orders::CreateOrderResponse,
            crate::error::ApiErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Service health"),
        (name = "orders", description = "Order submission"),
    ),
    info(
        title = "Order API",
        version = "1.0.0",
        description = "Accepts orders and publishes them as order events for asynchronous processing.",
    ),
)]
pub struct ApiDoc;

/// Swagger UI plus the raw OpenAPI document
pub fn create_docs_routes() -> Router<OrderApiServer> {
    Router::new().merge(SwaggerUi::new(SWAGGER_UI_PATH).url(OPENAPI_JSON_PATH, ApiDoc::openapi()))
}
