//! Common error handling utilities for the order events services
//!
//! Provides the process-level error type used by the binaries' composition
//! roots and the structured error codes surfaced in API responses.
//!
//! # Example
//!
//! ```rust
//! use error_common::{OrderServiceError, Result};
//!
//! fn require_connection_string(value: Option<&str>) -> Result<&str> {
//!     value.ok_or_else(|| {
//!         OrderServiceError::ConfigError("broker.connection_string is not configured".to_string())
//!     })
//! }
//!
//! assert!(require_connection_string(None).is_err());
//! ```

pub mod codes;
pub mod types;

pub use codes::*;
pub use types::*;
