use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use config_engine::{BrokerSettings, ConfigLoader};
use error_common::{OrderServiceError, Result};
use events_bus::{connect_broker, OrderPublisher};
use telemetry::{init_tracing, print_startup_banner, TracingConfig};
use tracing::info;

use order_api::{create_app, openapi, routes::paths, OrderApiServer};

/// Order API HTTP server
#[derive(Parser, Debug)]
#[command(name = "order-api")]
#[command(about = "Accepts orders over HTTP and publishes them as order events")]
struct Args {
    /// Server bind address
    #[arg(long, default_value = "0.0.0.0", env = "ORDERS_HOST")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "8080", env = "ORDERS_PORT")]
    port: u16,

    /// Configuration file path
    #[arg(short, long, default_value = "orders.yaml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(&TracingConfig::new("order_api").verbose(args.verbose))
        .map_err(|e| OrderServiceError::InternalError(e.to_string()))?;
    print_startup_banner("ORDER API", "Order intake and event publishing");

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
    let publisher = OrderPublisher::new(broker, &config)
        .map_err(|e| OrderServiceError::ConfigError(e.to_string()))?;
    let topic = publisher.topic().to_string();

    let app = create_app(OrderApiServer::new(Arc::new(publisher), topic));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .map_err(|e| OrderServiceError::ConfigError(format!("Invalid bind address: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| OrderServiceError::NetworkError(format!("Failed to bind to {addr}: {e}")))?;

    info!("🚀 {}", format!("Order API running on http://{addr}").bright_green());
    info!("📋 {}", format!("Orders endpoint: http://{addr}{}", paths::ORDERS).bright_blue());
    info!("📋 {}", format!("API docs: http://{addr}{}", openapi::SWAGGER_UI_PATH).bright_blue());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| OrderServiceError::ServerError(format!("HTTP server error: {e}")))?;

    info!("Order API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
