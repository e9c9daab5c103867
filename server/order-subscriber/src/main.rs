use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use config_engine::{BrokerSettings, ConfigLoader};
use error_common::{log_error, OrderServiceError, Result};
use events_bus::{connect_broker, LoggingOrderHandler, OrderSubscriber};
use telemetry::{init_tracing, print_startup_banner, TracingConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Order event subscriber
#[derive(Parser, Debug)]
#[command(name = "order-subscriber")]
#[command(about = "Consumes order events from the configured topic subscription")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "orders.yaml")]
    config: String,

    /// Seconds to wait for the message in progress when shutting down
    #[arg(long, default_value = "30", env = "ORDERS_SHUTDOWN_TIMEOUT_SECS")]
    shutdown_timeout_secs: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(&TracingConfig::new("order_subscriber").verbose(args.verbose))
        .map_err(|e| OrderServiceError::InternalError(e.to_string()))?;
    print_startup_banner("ORDER SUBSCRIBER", "Order event processing");

    info!("📋 Version: {}", env!("CARGO_PKG_VERSION").bright_white());

    let config = ConfigLoader::new()
        .with_file(&args.config)
        .load()
        .map_err(|e| OrderServiceError::ConfigError(e.to_string()))?;
    let settings = BrokerSettings::from_source(&config)
        .map_err(|e| OrderServiceError::ConfigError(e.to_string()))?;

    let broker = connect_broker(&settings)
        .await
        .map_err(|e| OrderServiceError::BrokerError(e.to_string()))?;
    let subscriber = OrderSubscriber::new(broker, &config, Arc::new(LoggingOrderHandler))
        .map_err(|e| OrderServiceError::ConfigError(e.to_string()))?;

    let startup = CancellationToken::new();
    let start = subscriber.start(&startup);
    tokio::pin!(start);
    tokio::select! {
        started = &mut start => {
            started.map_err(|e| OrderServiceError::BrokerError(e.to_string()))?;
        }
        _ = shutdown_signal() => {
            startup.cancel();
            if let Err(e) = start.await {
                warn!(error = %e, "Startup abandoned");
            }
            subscriber
                .stop(&CancellationToken::new())
                .await
                .map_err(|e| OrderServiceError::BrokerError(e.to_string()))?;
            return Ok(());
        }
    }

    info!(
        "🚀 {}",
        format!(
            "Listening on {}/subscriptions/{}",
            subscriber.topic(),
            subscriber.subscription()
        )
        .bright_green()
    );

    let broker_closed = tokio::select! {
        _ = shutdown_signal() => false,
        _ = subscriber.stopped() => true,
    };
    if broker_closed {
        warn!(subscription = %subscriber.subscription(), "Subscription closed by the broker");
    }

    let grace = CancellationToken::new();
    let timeout = Duration::from_secs(args.shutdown_timeout_secs);
    let deadline = {
        let grace = grace.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            grace.cancel();
        })
    };

    let stopped = subscriber.stop(&grace).await;
    deadline.abort();

    if let Err(e) = stopped {
        let error = OrderServiceError::BrokerError(e.to_string());
        log_error("subscriber shutdown", &error);
        return Err(error);
    }

    if broker_closed {
        let error = OrderServiceError::BrokerError(format!(
            "subscription {} closed by the broker",
            subscriber.subscription()
        ));
        log_error("subscriber shutdown", &error);
        return Err(error);
    }

    info!("Order subscriber stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}
