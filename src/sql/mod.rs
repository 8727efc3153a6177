//! Embedded SQL access.
//!
//! # Data Flow
//! ```text
//! route handler
//!     → client.rs (query / execute / stream / with_transaction)
//!     → blocking pool, one shared rusqlite::Connection behind a mutex
//!     → rows decoded to JSON records (or serde types via query_as)
//! ```
//!
//! # Design Decisions
//! - One connection, acquired at startup and released at shutdown
//! - No pool: SQLite serializes writers anyway
//! - Streams are bounded and stop on drop or cancellation

pub mod client;
pub mod error;

pub use client::{ExecSummary, Record, SqlClient, SqlTx};
pub use error::{SqlError, SqlResult};
pub use rusqlite::types::Value as SqlValue;
