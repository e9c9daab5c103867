use std::fmt;

use thiserror::Error;

/// Broker-side operation during which a transport error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    Connect,
    Send,
    Receive,
    Complete,
    DeadLetter,
    Close,
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Send => "send",
            Self::Receive => "receive",
            Self::Complete => "complete",
            Self::DeadLetter => "dead-letter",
            Self::Close => "close",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum EventBusError {
    /// Missing or invalid settings; raised at component construction
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Event serialization failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Malformed message body; contained by the message callback
    #[error("Event deserialization failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// The broker rejected or failed to confirm a send
    #[error("Event publishing failed: {0}")]
    Publish(String),

    /// Downstream handler failure; the message is left for redelivery
    #[error("Order handler failed: {0}")]
    Handler(#[from] HandlerError),

    /// Connection or processor level failure reported to the error callback
    #[error("Broker transport error on {entity_path} during {operation}: {message}")]
    Transport {
        entity_path: String,
        operation: ErrorSource,
        message: String,
    },

    #[error("Message processor failed to start: {0}")]
    Startup(String),

    #[error("Message settlement failed: {0}")]
    Settlement(String),

    #[error("Event broker connection failed: {0}")]
    BrokerConnection(String),
}

impl From<config_engine::ConfigError> for EventBusError {
    fn from(error: config_engine::ConfigError) -> Self {
        Self::Configuration(error.to_string())
    }
}

/// Failure raised by an [`OrderHandler`](crate::handlers::OrderHandler)
#[derive(Error, Debug)]
#[error(transparent)]
pub struct HandlerError(#[from] anyhow::Error);

impl HandlerError {
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self(anyhow::Error::msg(message))
    }
}

pub type Result<T> = std::result::Result<T, EventBusError>;
