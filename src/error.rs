//! Error types for the hierarchy engine

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the hierarchy engine
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Tier Errors
    // =========================================================================
    /// A cache or storage tier could not serve the request.
    ///
    /// Single-tier failures are absorbed by the resolver; this only reaches a
    /// caller when every remote tier failed for the same request.
    #[error("Tier {tier} unavailable: {reason}")]
    TierUnavailable { tier: String, reason: String },

    /// No tier holds the requested entity
    #[error("Hierarchy node not found: {0}")]
    HierarchyNotFound(String),

    /// Deadline expired before any tier answered
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// A pooled connection could not be acquired in time
    #[error("Connection pool '{pool}' exhausted after waiting {waited:?}")]
    PoolExhausted { pool: String, waited: Duration },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    /// Malformed path, out-of-range confidence, unknown entity type
    #[error("Validation error: {0}")]
    Validation(String),

    // =========================================================================
    // Invalidation / Refresh Errors
    // =========================================================================
    /// A tier invalidation partially failed
    #[error("Invalidation failed at tier {tier}: {reason}")]
    InvalidationFailure { tier: String, reason: String },

    /// Materialized view refresh exhausted its retries
    #[error("View refresh for scope {scope} failed after {attempts} attempts: {reason}")]
    RefreshFailure {
        scope: String,
        attempts: u32,
        reason: String,
    },

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    /// Cached value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a tier failure
    pub fn tier_unavailable(tier: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Error::TierUnavailable {
            tier: tier.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a validation failure
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Whether this error is the caller's fault rather than an infrastructure fault
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::tier_unavailable("L2", "connection refused");
        assert_eq!(err.to_string(), "Tier L2 unavailable: connection refused");

        let err = Error::validation("confidence 1.5 outside [0, 1]");
        assert!(err.is_validation());
        assert!(err.to_string().contains("1.5"));
    }

    #[test]
    fn test_refresh_failure_display() {
        let err = Error::RefreshFailure {
            scope: "geographic".to_string(),
            attempts: 3,
            reason: "deadlock detected".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "View refresh for scope geographic failed after 3 attempts: deadlock detected"
        );
        assert!(!err.is_validation());
    }
}
