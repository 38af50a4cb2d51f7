//! # Presence Server
//!
//! Realtime presence hub: tells every client who else is online and relays
//! their messages to everyone.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! presence
//!
//! # Run with a custom config file
//! PRESENCE_CONFIG=/path/to/presence.toml presence
//!
//! # Override individual settings
//! PRESENCE_PORT=8080 PRESENCE_HOST=0.0.0.0 PRESENCE_HUB__REUSE_POLICY=fifo presence
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "presence=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!(
        "Starting presence server on {}:{}",
        config.host,
        config.port
    );

    // Initialize metrics
    if config.metrics.enabled {
        metrics::init_metrics();
    }

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
