//! Error types shared across the CoralKV services.
//!
//! One taxonomy covers every request path so each HTTP surface can map an
//! error onto a status code the same way. `thiserror` derives `Display`
//! and `std::error::Error`.

use std::io;
use thiserror::Error;

/// Result type alias for CoralKV operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the CoralKV services.
///
/// Variants map onto HTTP status codes via [`Error::status_code`]:
/// request-shape problems are 4xx, infrastructure problems are 5xx.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request: empty key, bad TTL string, unknown consistency level
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or unresolvable API key
    #[error("authentication failed: {0}")]
    Unauthenticated(String),

    /// The caller's token bucket is empty
    #[error("rate limit exceeded for user {0}")]
    RateLimited(String),

    /// Key absent, or present but expired
    #[error("key not found: {0}")]
    NotFound(String),

    /// No ring nodes, unreachable primary, or a full replication queue
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Strong-mode replication missed its quorum deadline
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// I/O error (WAL append, fsync, file open)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON or wire-format encode/decode failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// On-disk data failed integrity checks
    #[error("data corruption: {0}")]
    Corruption(String),

    /// Catch-all for invariant violations that have no better home
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// The HTTP status code this error surfaces as.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::BadRequest(_) => 400,
            Error::Unauthenticated(_) => 401,
            Error::NotFound(_) => 404,
            Error::Timeout(_) => 408,
            Error::RateLimited(_) => 429,
            Error::Io(_) | Error::Serialization(_) | Error::Corruption(_) | Error::Internal(_) => {
                500
            }
            Error::Unavailable(_) => 503,
        }
    }

    /// Whether the caller can safely retry the operation as-is.
    ///
    /// SET and DELETE are idempotent, so anything that is not a
    /// request-shape problem is retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::BadRequest(_) | Error::Unauthenticated(_) | Error::NotFound(_)
        )
    }
}
