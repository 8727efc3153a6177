use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::server::AppState;
use crate::inflight::{PendingSnapshot, RegistryStats};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub in_flight: usize,
    pub stats: RegistryStats,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        in_flight: state.registry.len(),
        stats: state.registry.stats(),
    })
}

/// In-flight requests, oldest key first.
pub async fn get_requests(State(state): State<AppState>) -> Json<Vec<PendingSnapshot>> {
    Json(state.registry.snapshot())
}
