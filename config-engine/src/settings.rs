use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::providers::SettingsSource;
use crate::validation::{optional_setting, require_setting};

/// Setting keys understood by the services.
///
/// Environment variables map onto these with the `ORDERS__` prefix, e.g.
/// `ORDERS__BROKER__CONNECTION_STRING`.
pub mod keys {
    pub const CONNECTION_STRING: &str = "broker.connection_string";
    pub const TOPIC_NAME: &str = "broker.topic_name";
    pub const TOPIC_URL: &str = "broker.topic_url";
    pub const SUBSCRIPTION_NAME: &str = "broker.subscription_name";
    pub const MAX_DELIVERY_COUNT: &str = "broker.max_delivery_count";
    pub const STREAM_NAME: &str = "broker.stream_name";
    pub const ACK_WAIT_SECS: &str = "broker.ack_wait_secs";
    pub const DUPLICATE_WINDOW_SECS: &str = "broker.duplicate_window_secs";
    pub const DEAD_LETTER_SUFFIX: &str = "broker.dead_letter_suffix";
}

pub const DEFAULT_MAX_DELIVERY_COUNT: u64 = 10;
pub const DEFAULT_STREAM_NAME: &str = "ORDERS";
pub const DEFAULT_ACK_WAIT_SECS: u64 = 30;
pub const DEFAULT_DUPLICATE_WINDOW_SECS: u64 = 120;
pub const DEFAULT_DEAD_LETTER_SUFFIX: &str = ".deadletter";

/// A `;`-separated list of `key=value` segments.
///
/// Keys are matched case-insensitively and the value is everything after
/// the first `=`. A string without any `=` is treated as a bare endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    raw: String,
    segments: Vec<(String, String)>,
}

impl ConnectionString {
    pub const ENDPOINT: &'static str = "Endpoint";
    pub const ENTITY_PATH: &'static str = "EntityPath";
    pub const TOKEN: &'static str = "Token";

    pub fn parse(raw: &str) -> Self {
        let segments = raw
            .split(';')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .filter_map(|segment| {
                segment
                    .split_once('=')
                    .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            })
            .collect();

        Self {
            raw: raw.trim().to_string(),
            segments,
        }
    }

    /// First non-empty value whose key matches, ignoring case
    pub fn get(&self, key: &str) -> Option<&str> {
        self.segments
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Broker URL: the `Endpoint` segment, or the whole string when it has no segments
    pub fn endpoint(&self) -> &str {
        match self.get(Self::ENDPOINT) {
            Some(endpoint) => endpoint,
            None if self.segments.is_empty() => &self.raw,
            None => "",
        }
    }

    pub fn entity_path(&self) -> Option<&str> {
        self.get(Self::ENTITY_PATH)
    }

    pub fn token(&self) -> Option<&str> {
        self.get(Self::TOKEN)
    }
}

/// Typed view over the broker settings shared by publisher and subscriber
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub connection: ConnectionString,
    pub stream_name: String,
    pub ack_wait: Duration,
    pub duplicate_window: Duration,
    pub dead_letter_suffix: String,
}

impl BrokerSettings {
    /// Read broker settings; fails when the connection string is absent.
    pub fn from_source(source: &dyn SettingsSource) -> Result<Self> {
        let connection = ConnectionString::parse(&require_setting(source, keys::CONNECTION_STRING)?);
        if connection.endpoint().is_empty() {
            return Err(ConfigError::Invalid {
                key: keys::CONNECTION_STRING.to_string(),
                reason: "no Endpoint segment".to_string(),
            });
        }

        Ok(Self {
            connection,
            stream_name: source
                .get_string(keys::STREAM_NAME)
                .unwrap_or_else(|| DEFAULT_STREAM_NAME.to_string()),
            ack_wait: Duration::from_secs(
                optional_setting(source, keys::ACK_WAIT_SECS)?.unwrap_or(DEFAULT_ACK_WAIT_SECS),
            ),
            duplicate_window: Duration::from_secs(
                optional_setting(source, keys::DUPLICATE_WINDOW_SECS)?
                    .unwrap_or(DEFAULT_DUPLICATE_WINDOW_SECS),
            ),
            dead_letter_suffix: source
                .get_string(keys::DEAD_LETTER_SUFFIX)
                .unwrap_or_else(|| DEFAULT_DEAD_LETTER_SUFFIX.to_string()),
        })
    }
}
