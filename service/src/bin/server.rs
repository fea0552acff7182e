//! Ticket service server.
//!
//! This binary:
//! - Connects to `PostgreSQL` and applies migrations
//! - Connects to `RedPanda` and declares the payment and notification topics
//! - Consumes payment events and issues ticket instances
//! - Serves the redemption API under `/tickets/v1`
//! - Exposes Prometheus metrics on a separate port
//!
//! # Usage
//!
//! ```bash
//! docker compose up -d
//! cargo run --bin server
//! ```

use std::net::SocketAddr;
use ticketsync_service::{Config, build_application, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ticketsync=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ticket service...");

    let config = Config::from_env();
    tracing::info!(
        redpanda = %config.redpanda.brokers,
        consumer_group = %config.redpanda.consumer_group,
        payment_topic = %config.redpanda.payment_topic,
        notification_topic = %config.redpanda.notification_topic,
        "Configuration loaded"
    );

    let metrics_addr: SocketAddr =
        format!("{}:{}", config.server.metrics_host, config.server.metrics_port).parse()?;
    metrics::install_exporter(metrics_addr)?;

    let app = build_application(&config).await?;
    tracing::info!(
        address = %format!("{}:{}", config.server.host, config.server.port),
        "Ticket service is running, press Ctrl+C to shut down"
    );

    app.run().await?;
    Ok(())
}
