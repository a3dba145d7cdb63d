//! Event store error types.

use thiserror::Error;

/// Event store error type.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The durable medium rejected a write (disk full, locked, I/O failure).
    /// The event passed to `enqueue` has been dropped.
    #[error("Store write failed: {0}")]
    Write(String),

    /// A selection or aggregate query failed.
    #[error("Store read failed: {0}")]
    Read(String),

    /// The configured size ceiling would be exceeded by this enqueue.
    #[error("Store overflow: {current} + {incoming} bytes exceeds limit of {limit} bytes")]
    Overflow {
        current: u64,
        incoming: u64,
        limit: u64,
    },

    /// The durable medium is unreadable. Fatal for the namespace.
    #[error("Store corrupted: {0}")]
    Corrupt(String),

    /// Namespace cannot be mapped to a store.
    #[error("Invalid namespace: {0:?}")]
    InvalidNamespace(String),

    /// SQLite error outside of a classified operation (open, migrate).
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Payload (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether this error means the namespace can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Corrupt(_))
    }

    /// Whether this error rejected an enqueue because of the size ceiling.
    pub fn is_overflow(&self) -> bool {
        matches!(self, StoreError::Overflow { .. })
    }
}

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;
