//! Request identification at the edge.
//!
//! # Responsibilities
//! - Assign a UUID v4 `x-request-id` to requests that arrive without one
//! - Echo the id back on the response
//!
//! # Design Decisions
//! - The id is set before the trace layer so request spans carry it
//! - A client-supplied id is kept as-is; it is only used for correlation,
//!   never as a registry key

use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

/// Header carrying the request correlation id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Layer that generates `x-request-id` when missing.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::x_request_id(MakeRequestUuid)
}

/// Layer that copies `x-request-id` from the request onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::x_request_id()
}
