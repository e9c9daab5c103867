use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is not configured")]
    Missing(String),

    #[error("{key} is invalid: {reason}")]
    Invalid { key: String, reason: String },

    #[error("Configuration loading failed: {0}")]
    Load(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
