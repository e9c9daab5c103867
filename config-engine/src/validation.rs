// Required/optional setting helpers
use std::fmt::Display;
use std::str::FromStr;

use crate::error::{ConfigError, Result};
use crate::providers::SettingsSource;

/// Look up a setting that must be present and non-blank
pub fn require_setting(source: &dyn SettingsSource, key: &str) -> Result<String> {
    source
        .get_string(key)
        .ok_or_else(|| ConfigError::Missing(key.to_string()))
}

/// Parse an optional setting; present but unparseable is an error
pub fn optional_setting<T>(source: &dyn SettingsSource, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    source
        .get_string(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                key: key.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}
