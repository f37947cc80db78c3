//! # pointsync
//!
//! Realtime collaborative point-set server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! pointsync
//!
//! # Run with a specific config file
//! POINTSYNC_CONFIG=/path/to/pointsync.toml pointsync
//!
//! # Run with environment variables
//! POINTSYNC_PORT=8080 POINTSYNC_HOST=0.0.0.0 pointsync
//! ```

use anyhow::Result;
use pointsync_server::{config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pointsync=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting pointsync server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
