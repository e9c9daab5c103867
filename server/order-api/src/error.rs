use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use error_common::codes;
use events_bus::EventBusError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiErrorResponse {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Error type
    #[schema(example = "bad_request")]
    pub error_type: String,
    /// Stable error code
    #[schema(example = "VALIDATION_1003")]
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Timestamp when error occurred
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {message}")]
    BadRequest { code: &'static str, message: String },

    /// The broker did not confirm the publish
    #[error("Publish failed: {message}")]
    Publish { message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn missing_body() -> Self {
        Self::BadRequest {
            code: codes::validation::MISSING_BODY,
            message: "request body is required".to_string(),
        }
    }

    pub fn invalid_body(message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: codes::validation::INVALID_FORMAT,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Publish { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::BadRequest { .. } => "bad_request",
            ApiError::Publish { .. } => "publish_failed",
            ApiError::Internal { .. } => "internal_error",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest { code, .. } => *code,
            ApiError::Publish { .. } => codes::broker::PUBLISH_FAILED,
            ApiError::Internal { .. } => codes::system::INTERNAL_ERROR,
        }
    }
}

impl From<EventBusError> for ApiError {
    fn from(error: EventBusError) -> Self {
        match error {
            EventBusError::Decode(e) => Self::invalid_body(e.to_string()),
            EventBusError::Publish(message) => Self::Publish { message },
            other => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_id = Uuid::new_v4().to_string();
        let status_code = self.status_code();

        if status_code.is_server_error() {
            error!(
                error_id = %error_id,
                error_type = %self.error_type(),
                status_code = %status_code.as_u16(),
                error = %self,
                "API error occurred"
            );
        } else {
            warn!(
                error_id = %error_id,
                error_type = %self.error_type(),
                status_code = %status_code.as_u16(),
                error = %self,
                "Request rejected"
            );
        }

        // Internal details stay in the log
        let message = match &self {
            ApiError::Internal { .. } => "internal server error".to_string(),
            _ => self.to_string(),
        };

        let body = ApiErrorResponse {
            error_id,
            error_type: self.error_type().to_string(),
            code: self.code().to_string(),
            message,
            timestamp: chrono::Utc::now(),
        };

        (status_code, Json(body)).into_response()
    }
}
