//! Error types for the courier connection pool
//!
//! This module defines the error kinds the pooling engine can surface to
//! callers, with a focus on clear failure modes and operational visibility.

use thiserror::Error;

/// Main error type for courier operations
#[derive(Error, Debug)]
pub enum CourierError {
    /// Opening a new transport to an endpoint failed (network error, auth
    /// error). Surfaced to the caller of `acquire` as-is; the engine never
    /// retries allocation on its own.
    #[error("allocation failed for {endpoint}: {message}")]
    Allocation {
        endpoint: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An `acquire` call timed out waiting for pool capacity.
    #[error("pool for {endpoint} exhausted: no transport available within {wait_ms}ms")]
    PoolExhausted { endpoint: String, wait_ms: u64 },

    /// Operation attempted on a pool or cluster that has been closed.
    #[error("pool for {endpoint} is closed")]
    PoolClosed { endpoint: String },

    /// Configuration rejected at build time.
    #[error("configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for courier operations
pub type CourierResult<T> = Result<T, CourierError>;

impl CourierError {
    /// Create an allocation error without an underlying cause
    pub fn allocation(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Allocation {
            endpoint: endpoint.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create an allocation error wrapping an underlying cause
    pub fn allocation_with_source(
        endpoint: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Allocation {
            endpoint: endpoint.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a pool-exhausted error
    pub fn exhausted(endpoint: impl Into<String>, wait_ms: u64) -> Self {
        Self::PoolExhausted {
            endpoint: endpoint.into(),
            wait_ms,
        }
    }

    /// Create a pool-closed error
    pub fn closed(endpoint: impl Into<String>) -> Self {
        Self::PoolClosed {
            endpoint: endpoint.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Determine if this error is retryable
    ///
    /// Exhaustion is transient by definition. Allocation failures may or
    /// may not be; the caller owns that decision, so they are reported as
    /// non-retryable here.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CourierError::allocation("smtp.example.com:587", "connection refused");
        assert_eq!(
            err.to_string(),
            "allocation failed for smtp.example.com:587: connection refused"
        );

        let err = CourierError::exhausted("smtp.example.com:587", 250);
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn test_error_retryable() {
        assert!(CourierError::exhausted("backend", 100).is_retryable());
        assert!(!CourierError::allocation("backend", "refused").is_retryable());
        assert!(!CourierError::closed("backend").is_retryable());
        assert!(!CourierError::config("max_size must be >= 1").is_retryable());
    }

    #[test]
    fn test_allocation_source_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = CourierError::allocation_with_source("backend", "connect failed", io);
        assert!(std::error::Error::source(&err).is_some());
    }
}
