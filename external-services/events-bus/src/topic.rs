// Topic and subscription name resolution from layered settings
use config_engine::{keys, ConnectionString, SettingsSource};
use url::Url;

use crate::error::{EventBusError, Result};

/// Which component is resolving; only subscribers fall back to `EntityPath`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverSide {
    Publisher,
    Subscriber,
}

/// Resolve the topic name. First non-empty source wins:
///
/// 1. `broker.topic_name`
/// 2. last path segment of `broker.topic_url`
/// 3. `EntityPath` in `broker.connection_string` (subscriber only)
///
/// Call once when a component is constructed; the result does not change
/// for the component's lifetime.
pub fn resolve_topic(source: &dyn SettingsSource, side: ResolverSide) -> Result<String> {
    if let Some(name) = source.get_string(keys::TOPIC_NAME) {
        return Ok(name.trim().to_string());
    }

    if let Some(raw_url) = source.get_string(keys::TOPIC_URL) {
        return topic_from_url(&raw_url);
    }

    if side == ResolverSide::Subscriber {
        let entity_path = source
            .get_string(keys::CONNECTION_STRING)
            .and_then(|raw| ConnectionString::parse(&raw).entity_path().map(str::to_string));
        if let Some(name) = entity_path {
            return Ok(name);
        }
    }

    let checked = match side {
        ResolverSide::Publisher => format!("{}, {}", keys::TOPIC_NAME, keys::TOPIC_URL),
        ResolverSide::Subscriber => format!(
            "{}, {}, {} (EntityPath)",
            keys::TOPIC_NAME,
            keys::TOPIC_URL,
            keys::CONNECTION_STRING
        ),
    };
    Err(EventBusError::Configuration(format!(
        "no topic configured; checked {checked}"
    )))
}

/// Resolve the subscription name; required on the subscriber side
pub fn resolve_subscription(source: &dyn SettingsSource) -> Result<String> {
    source
        .get_string(keys::SUBSCRIPTION_NAME)
        .map(|name| name.trim().to_string())
        .ok_or_else(|| {
            EventBusError::Configuration(format!("{} must be configured", keys::SUBSCRIPTION_NAME))
        })
}

fn topic_from_url(raw_url: &str) -> Result<String> {
    let url = Url::parse(raw_url.trim()).map_err(|e| {
        EventBusError::Configuration(format!(
            "{} is not a valid absolute URI: {e}",
            keys::TOPIC_URL
        ))
    })?;

    url.path()
        .trim_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            EventBusError::Configuration(format!(
                "{} does not contain a topic name",
                keys::TOPIC_URL
            ))
        })
}
