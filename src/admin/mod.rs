//! Admin API.
//!
//! # Responsibilities
//! - Report process status and registry counters
//! - List in-flight requests
//!
//! # Design Decisions
//! - Disabled unless `admin.enabled` is set
//! - Every route sits behind bearer-key auth
//! - Admin routes are plain axum handlers, not registered work

pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};

use self::auth::admin_auth_middleware;
use self::handlers::{get_requests, get_status};
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/requests", get(get_requests))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}
