//! Configuration management for the order events services
//!
//! Settings are read from layered sources, later layers overriding earlier
//! ones:
//!
//! - **Local Files**: YAML, TOML or JSON (optional)
//! - **Environment Variables**: `ORDERS__` prefix, `__` as the nesting separator
//!
//! Components never depend on a concrete source. They read through the
//! [`SettingsSource`] trait, which only exposes string lookups, so tests can
//! hand in a plain map.
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use config_engine::{keys, BrokerSettings, SettingsSource};
//!
//! let mut settings = HashMap::new();
//! settings.insert(
//!     keys::CONNECTION_STRING.to_string(),
//!     "Endpoint=memory://local;EntityPath=orders".to_string(),
//! );
//!
//! let broker = BrokerSettings::from_source(&settings).unwrap();
//! assert_eq!(broker.connection.endpoint(), "memory://local");
//! assert_eq!(settings.get_string(keys::TOPIC_NAME), None);
//! ```

pub mod error;
pub mod providers;
pub mod settings;
pub mod validation;

pub use error::*;
pub use providers::*;
pub use settings::*;
pub use validation::*;
