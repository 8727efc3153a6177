//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, graceful shutdown)
//!     → request.rs (assign x-request-id)
//!     → bridge.rs (build RouteRequest, register with the in-flight registry)
//!     → handler writes through ResponseSink
//!     → bridge.rs returns the finalized response
//! ```

pub mod bridge;
pub mod request;
pub mod server;

pub use bridge::RouteBridge;
pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
