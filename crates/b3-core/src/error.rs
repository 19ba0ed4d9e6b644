//! Error types for data operations.
//!
//! This module defines [`DataError`] which covers all error cases that can occur
//! when fetching, normalizing, cleaning, or persisting OHLCV data.

use thiserror::Error;

/// Errors that can occur during data operations.
#[derive(Error, Debug)]
pub enum DataError {
    /// An invalid argument was provided (empty symbol, inverted date range, bad URL).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A component was constructed with an invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Network-related errors (connection failures, timeouts, etc.).
    #[error("Network error: {0}")]
    Network(String),

    /// Rate limit exceeded by a provider (HTTP 429).
    #[error("Rate limited by {provider}: retry after {retry_after:?}")]
    RateLimited {
        /// The provider that rate limited the request.
        provider: String,
        /// Suggested time to wait before retrying, when the server sent one.
        retry_after: Option<std::time::Duration>,
    },

    /// The provider answered with a 5xx status.
    #[error("Server error: HTTP {status} from {provider}")]
    Server {
        /// The provider that failed.
        provider: String,
        /// HTTP status code.
        status: u16,
    },

    /// The provider answered with a status that is neither success nor retryable.
    #[error("HTTP {status} for {url}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// Malformed JSON or an unexpected payload shape.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A table is missing required columns or a column has an unusable type.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Error reading or writing persisted data.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl DataError {
    /// Returns true for the error classes the HTTP client retries
    /// (network failures, rate limiting, and 5xx responses).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::Server { .. }
        )
    }
}

/// Result type alias using [`DataError`].
pub type Result<T> = std::result::Result<T, DataError>;
