use std::env;

use colored::Colorize;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::error::{Result, TelemetryError};

/// Environment variable selecting the runtime environment
pub const ENVIRONMENT_VAR: &str = "ORDERS_ENV";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Colored, human readable lines
    Pretty,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Crate target used for the default filter directive
    pub service_name: String,
    pub verbose: bool,
    /// `None` picks a format from the environment
    pub format: Option<LogFormat>,
}

impl TracingConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            verbose: false,
            format: None,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Default filter, used when `RUST_LOG` is not set
    pub fn default_directive(&self) -> String {
        let level = if self.verbose { Level::DEBUG } else { Level::INFO };
        format!(
            "{service}={level},events_bus={level},tower_http=info,async_nats=warn,hyper=info",
            service = self.service_name.replace('-', "_"),
        )
    }
}

/// Pick the log format for the current process
pub fn detect_format() -> LogFormat {
    let is_development = env::var(ENVIRONMENT_VAR)
        .map(|value| value.eq_ignore_ascii_case("development"))
        .unwrap_or(true);
    let use_colors = env::var("NO_COLOR").is_err() && atty::is(atty::Stream::Stdout);

    if is_development && use_colors {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

/// Install the global tracing subscriber. Fails if one is already installed.
pub fn init_tracing(config: &TracingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    let result = match config.format.unwrap_or_else(detect_format) {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(true)
                    .with_level(true),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .json(),
            )
            .try_init(),
    };

    result.map_err(|e| TelemetryError::TracingError(e.to_string()))
}

/// Print a startup banner when logging for humans
pub fn print_startup_banner(title: &str, subtitle: &str) {
    if detect_format() != LogFormat::Pretty {
        return;
    }
    println!("{}", "╔══════════════════════════════════════════════════════════════╗".bright_cyan());
    println!("{}", format!("║ {title:<60} ║").bright_cyan());
    println!("{}", format!("║ {subtitle:<60} ║").bright_cyan());
    println!("{}", "╚══════════════════════════════════════════════════════════════╝".bright_cyan());
    println!();
}
