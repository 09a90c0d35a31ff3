//! Error types for the store crate.

use thiserror::Error;

/// Errors that can occur during backend operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Record or checkpoint serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The durable backend is unreachable or timed out.
    ///
    /// Raised by the durable backend itself or by the fallback wrapper's
    /// bounded timeout; it triggers degradation, never indefinite blocking.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness constraint was violated.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Stored data failed to decode.
    #[error("corrupt stored data: {0}")]
    Corrupt(String),

    /// Schema migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
