//! Error types for tipledger.

use thiserror::Error;

/// Result type alias using tipledger's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for tipledger operations.
///
/// Expected outcomes of the reconciliation pipeline (a rejected duplicate,
/// an ambiguous classification) are *not* errors; they are modelled as
/// structured results so callers can act on them. The variants here are
/// genuine faults: unavailable collaborators, violated invariants, and bad
/// input.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uploaded document not found
    #[error("Document not found: {0}")]
    DocumentNotFound(uuid::Uuid),

    /// Trip not found
    #[error("Trip not found: {0}")]
    TripNotFound(uuid::Uuid),

    /// The recognition oracle failed or timed out; the document stays
    /// pending and the caller may retry.
    #[error("Recognition unavailable: {0}")]
    RecognitionUnavailable(String),

    /// A second writer tried to store a different value under a populated
    /// cache key. Fatal to the triggering request, never resolved by
    /// overwrite.
    #[error("Cache key collision: {0}")]
    CacheKeyCollision(String),

    /// A cached computation exceeded its configured budget; the key was
    /// released for another attempt.
    #[error("Compute budget exceeded for key {0}")]
    ComputeBudgetExceeded(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

impl Error {
    /// Whether the caller may safely retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RecognitionUnavailable(_) | Error::ComputeBudgetExceeded(_)
        )
    }
}
