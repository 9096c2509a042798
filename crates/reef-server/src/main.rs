//! # Reef Server
//!
//! Channel messaging server: JSON history and submit endpoints plus live
//! streams over SSE and WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! reef
//!
//! # Run with custom config
//! REEF_CONFIG=/path/to/reef.toml reef
//!
//! # Run with environment variables
//! REEF_PORT=8080 REEF_HOST=0.0.0.0 reef
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
                .unwrap_or_else(|_| "reef=debug,reef_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!(
        "Starting reef server on {}:{} with {} channel(s)",
        config.host,
        config.port,
        config.channels.len()
    );

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
