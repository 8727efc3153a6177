//! Startup orchestration.
//!
//! # Responsibilities
//! - Open the database and prepare the users table
//! - Bind the listener and begin accepting traffic
//! - Route OS signals into the shutdown coordinator
//! - Close the database on every exit path
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listener binds last (traffic only when ready)

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::BridgeConfig;
use crate::http::HttpServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::shutdown_signal;
use crate::sql::{SqlClient, SqlError};
use crate::users::SqlUserStore;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("server I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("database failed: {0}")]
    Sql(#[from] SqlError),
}

/// Run the service until a shutdown signal arrives.
pub async fn run(config: BridgeConfig) -> Result<(), StartupError> {
    let db = SqlClient::open(&config.database.path)?;

    let result = serve(config, db.clone()).await;

    if let Err(err) = db.close() {
        tracing::error!(error = %err, "Failed to close database");
    }
    result
}

async fn serve(config: BridgeConfig, db: SqlClient) -> Result<(), StartupError> {
    let store = SqlUserStore::new(db);
    store.migrate(config.database.seed_users).await?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, store);
    let server_shutdown = shutdown.subscribe();

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_shutdown.trigger();
    });

    server.run(listener, server_shutdown).await?;
    Ok(())
}
