use std::collections::HashMap;
use std::path::PathBuf;

use config::{Config, Environment, File};
use tracing::debug;

use crate::error::Result;

/// Environment variable prefix for every service setting
pub const ENV_PREFIX: &str = "ORDERS";

/// Separator between the prefix and nested key segments in variable names
pub const ENV_SEPARATOR: &str = "__";

/// A configuration source exposing string lookups.
///
/// Blank and whitespace-only values are reported as absent, so callers can
/// treat `None` as "not configured" without re-checking.
pub trait SettingsSource {
    fn get_string(&self, key: &str) -> Option<String>;
}

impl SettingsSource for Config {
    fn get_string(&self, key: &str) -> Option<String> {
        non_blank(Config::get_string(self, key).ok())
    }
}

impl SettingsSource for HashMap<String, String> {
    fn get_string(&self, key: &str) -> Option<String> {
        non_blank(self.get(key).cloned())
    }
}

impl<T: SettingsSource + ?Sized> SettingsSource for &T {
    fn get_string(&self, key: &str) -> Option<String> {
        (**self).get_string(key)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Builds a layered [`Config`]: optional file first, then environment.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            file: None,
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// Add a configuration file. A missing file is not an error.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn load(&self) -> Result<Config> {
        let mut builder = Config::builder();

        if let Some(path) = &self.file {
            debug!(path = %path.display(), "Adding configuration file layer");
            builder = builder.add_source(File::from(path.clone()).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR),
        );

        Ok(builder.build()?)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn test_map_source_treats_blank_as_absent() {
        let mut map = HashMap::new();
        map.insert("broker.topic_name".to_string(), "   ".to_string());
        map.insert("broker.topic_url".to_string(), "https://bus/orders".to_string());

        assert_eq!(map.get_string("broker.topic_name"), None);
        assert_eq!(
            map.get_string("broker.topic_url").as_deref(),
            Some("https://bus/orders")
        );
        assert_eq!(map.get_string("broker.subscription_name"), None);
    }

    #[test]
    fn test_config_source_reads_nested_keys() {
        let config = Config::builder()
            .add_source(File::from_str(
                "broker:\n  topic_name: orders\n  max_delivery_count: 5\n",
                FileFormat::Yaml,
            ))
            .build()
            .unwrap();

        assert_eq!(
            SettingsSource::get_string(&config, "broker.topic_name").as_deref(),
            Some("orders")
        );
        assert_eq!(
            SettingsSource::get_string(&config, "broker.max_delivery_count").as_deref(),
            Some("5")
        );
        assert_eq!(SettingsSource::get_string(&config, "broker.topic_url"), None);
    }

    #[test]
    fn test_loader_without_file_builds() {
        let config = ConfigLoader::new()
            .with_env_prefix("ORDERS_LOADER_TEST_UNUSED")
            .with_file("does-not-exist.yaml")
            .load()
            .unwrap();

        assert_eq!(SettingsSource::get_string(&config, "broker.topic_name"), None);
    }
}
