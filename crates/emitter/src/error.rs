//! Emitter error types.

use thiserror::Error;

/// Emitter error type.
///
/// Dispatch failures are not errors: they are outcomes handled inside the
/// emission loop. These errors cover setup and orchestration.
#[derive(Error, Debug)]
pub enum EmitterError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Event store error
    #[error("Store error: {0}")]
    Store(#[from] event_store::StoreError),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Collector URL could not be parsed
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A tracker already exists for this namespace
    #[error("Namespace already registered: {0}")]
    NamespaceExists(String),

    /// No tracker exists for this namespace
    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),
}

/// Result type alias using EmitterError.
pub type EmitterResult<T> = Result<T, EmitterError>;
