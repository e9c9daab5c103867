use thiserror::Error;

/// Process-level error for the order services
#[derive(Error, Debug)]
pub enum OrderServiceError {
    /// Missing or invalid configuration; fatal at startup
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Broker connection or subscription failures
    #[error("Broker error: {0}")]
    BrokerError(String),

    /// Network communication errors
    #[error("Network error: {0}")]
    NetworkError(String),

    /// HTTP server errors
    #[error("Server error: {0}")]
    ServerError(String),

    /// Internal system errors
    #[error("Internal error: {0}")]
    InternalError(String),

    /// Wrapped external errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for order service operations
pub type Result<T> = std::result::Result<T, OrderServiceError>;

/// Log an error with the context it occurred in
pub fn log_error(context: &str, error: &OrderServiceError) {
    tracing::error!(
        context = context,
        error = %error,
        "Order service error occurred"
    );
}
