//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router: users API through the route bridge, plus admin
//! - Wire up middleware (body limit, optional timeout, request ID, tracing)
//! - Serve until the shutdown signal, then drain the in-flight registry
//!
//! # Design Decisions
//! - The registry is owned here so shutdown can wait for every request task
//! - A request timeout drops the bridge future, which cancels the work the
//!   same way a client disconnect does
//! - Shutdown grace period: after the deadline, remaining work is cancelled

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::DefaultBodyLimit, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::setup_admin_router;
use crate::config::BridgeConfig;
use crate::http::bridge::RouteBridge;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::inflight::RequestRegistry;
use crate::lifecycle::shutdown::wait_for;
use crate::users::{self, UserStore};

/// Application state injected into admin handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: RequestRegistry,
    pub config: Arc<BridgeConfig>,
}

/// HTTP server for the request bridge.
pub struct HttpServer {
    router: Router,
    config: Arc<BridgeConfig>,
    registry: RequestRegistry,
}

impl HttpServer {
    /// Create a new HTTP server serving the users API from `store`.
    pub fn new<S: UserStore>(config: BridgeConfig, store: S) -> Self {
        let config = Arc::new(config);
        let registry = RequestRegistry::new();

        let state = AppState {
            registry: registry.clone(),
            config: Arc::clone(&config),
        };

        let router = Self::build_router(&config, state, store);
        Self {
            router,
            config,
            registry,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router<S: UserStore>(config: &BridgeConfig, state: AppState, store: S) -> Router {
        let bridge = users::mount(RouteBridge::new(state.registry.clone()), store);
        let mut router = bridge.into_router();

        if config.admin.enabled {
            router = router.merge(setup_admin_router(state));
        }

        router = router.layer(DefaultBodyLimit::max(config.limits.max_body_bytes));

        if let Some(secs) = config.timeouts.request_secs {
            router = router.layer(TimeoutLayer::new(Duration::from_secs(secs)));
        }

        router.layer(
            ServiceBuilder::new()
                .layer(set_request_id_layer())
                .layer(TraceLayer::new_for_http())
                .layer(propagate_request_id_layer()),
        )
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Returns once `shutdown` fires (or its sender is dropped) and every
    /// registered request has finalized.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let grace = Duration::from_secs(self.config.timeouts.shutdown_secs);
        let deadline = {
            let registry = self.registry.clone();
            let signal = shutdown.resubscribe();
            tokio::spawn(async move {
                wait_for(signal).await;
                tokio::time::sleep(grace).await;
                tracing::warn!(
                    in_flight = registry.len(),
                    "Shutdown grace period expired, cancelling in-flight requests"
                );
                registry.shutdown().await;
            })
        };

        let served = axum::serve(listener, self.router)
            .with_graceful_shutdown(wait_for(shutdown))
            .await;

        deadline.abort();
        self.registry.shutdown().await;
        tracing::info!(stats = ?self.registry.stats(), "HTTP server stopped");
        served
    }

    /// The in-flight registry serving this server's routes.
    pub fn registry(&self) -> &RequestRegistry {
        &self.registry
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}
