//! Error types for the healing pipeline.
//!
//! None of these escape [`crate::HealingOrchestrator::heal`]: oracle failures
//! become a degraded diagnosis and spawn failures become a sentinel execution
//! result. They surface only from the caller-facing loaders and constructors.

use thiserror::Error;

/// Errors raised while loading inputs or talking to the analysis oracle.
#[derive(Debug, Error)]
pub enum HealerError {
    /// HTTP transport failed (connection refused, timeout, TLS, ...)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Oracle answered with a non-success status
    #[error("Oracle API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Oracle answered without any content block
    #[error("Oracle response contained no content")]
    EmptyResponse,

    /// Oracle payload could not be turned into a diagnosis
    #[error("Failed to parse oracle response: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failure context could not be built from its external representation
    #[error("Malformed failure context: {0}")]
    MalformedInput(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used across the crate.
pub type HealerResult<T> = Result<T, HealerError>;
