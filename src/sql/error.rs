//! SQL error definitions.

use thiserror::Error;

/// Errors raised by [`crate::sql::SqlClient`].
#[derive(Debug, Error)]
pub enum SqlError {
    /// The shared connection has already been released.
    #[error("database connection is closed")]
    Closed,

    /// SQLite rejected the statement or failed while running it.
    #[error("query failed: {0}")]
    Query(#[from] rusqlite::Error),

    /// A row did not match the requested type.
    #[error("row decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    /// The blocking task running the statement died.
    #[error("database task failed: {0}")]
    Join(String),
}

/// Result type for SQL operations.
pub type SqlResult<T> = Result<T, SqlError>;
