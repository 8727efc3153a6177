//! Request bridge library.
//!
//! Serves HTTP routes as registered units of work: every request gets a
//! cancellation token, runs on a tracked task and is finalized exactly once
//! (`204` on silent success, `500` on failure, nothing when cancelled).

pub mod admin;
pub mod config;
pub mod http;
pub mod inflight;
pub mod lifecycle;
pub mod observability;
pub mod sql;
pub mod users;

pub use config::schema::BridgeConfig;
pub use http::{HttpServer, RouteBridge};
pub use inflight::RequestRegistry;
pub use lifecycle::Shutdown;
