//! In-flight request coordination.
//!
//! # Data Flow
//! ```text
//! axum handler (http/bridge.rs)
//!     → request.rs (RequestKey, RouteRequest)
//!     → registry.rs (insert entry, spawn task on the tracker)
//!         → execution.rs (run handler, race against cancellation token)
//!         → response.rs (finalize: 204 / 500 / silent close)
//!         → registry.rs (remove entry)
//!
//! Client disconnect:
//!     bridge drop guard → registry.cancel(key) → token fires
//!     → execution.rs observes it → normal completion path above
//! ```
//!
//! # Design Decisions
//! - One task per request, tracked so shutdown can wait for all of them
//! - Cancellation only requests a stop; the request's own task finalizes
//! - Duplicate keys are rejected, never replaced

pub mod execution;
pub mod registry;
pub mod request;
pub mod response;

pub use execution::{BoxError, ExecutionOutcome};
pub use registry::{PendingSnapshot, RegistryError, RegistryStats, RequestRegistry};
pub use request::{RequestKey, RouteRequest};
pub use response::{ResponseReceiver, ResponseSink};
