//! Request bridge server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http/server (request id, trace, body limit, timeout)
//!                         │
//!                         ▼
//!                     http/bridge ──register──▶ inflight/registry
//!                         │                         │ spawn on tracker
//!                         │ await response          ▼
//!                         │                     users/routes ──▶ sql/client
//!                         │                         │
//!                         │◀──── finalize ──────────┘
//!     Client Response     │      (204 / 500 / silent on cancel)
//!     ◀───────────────────┘
//!
//!     disconnect: bridge drop guard ──cancel──▶ registry ──▶ token
//! ```

use std::path::PathBuf;

use clap::Parser;

use request_bridge::config::{load_config, validate_config, BridgeConfig, ConfigError};
use request_bridge::lifecycle::startup;
use request_bridge::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "request-bridge")]
#[command(about = "HTTP users API served through a cancellable request registry", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`
    #[arg(short, long)]
    bind: Option<String>,

    /// Override `database.path`
    #[arg(short, long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }
    if let Some(database) = args.database {
        config.database.path = database;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "request-bridge starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        database = %config.database.path,
        request_timeout_secs = ?config.timeouts.request_secs,
        admin_enabled = config.admin.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    startup::run(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
