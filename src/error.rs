//! Error types for the decision core.
//!
//! Only configuration problems and store connectivity are errors. Allow,
//! deny and cancellation are ordinary outcomes and never travel through
//! these types.

use thiserror::Error;

use crate::config::validation::ValidationError;

/// Errors raised while building or reconfiguring policies.
#[derive(Debug, Error)]
pub enum TrafficError {
    /// Policy parameters or rules were rejected. Nothing is clamped.
    #[error("invalid configuration: {}", join_errors(.0))]
    Configuration(Vec<ValidationError>),

    /// A synchronous decision was requested from a store-backed limiter.
    #[error("rate limiter `{policy}` is store-backed and must be checked asynchronously")]
    RequiresAsync { policy: String },

    /// The token store could not be reached.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TrafficError {
    /// Configuration error for a single field.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        TrafficError::Configuration(vec![ValidationError::new(field, message)])
    }
}

/// Failures of a remote token store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store is unreachable or refused the command.
    #[error("token store unavailable: {0}")]
    Unavailable(String),

    /// Store answered with something the bucket script never returns.
    #[error("malformed token store reply: {0}")]
    Protocol(String),

    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[cfg(feature = "redis")]
impl StoreError {
    /// Classify a Redis failure: lost or refused connections and timeouts
    /// mean the store is unavailable.
    pub fn from_redis(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Redis(err)
        }
    }
}

/// Result type for policy construction and reconfiguration.
pub type TrafficResult<T> = Result<T, TrafficError>;

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrafficError::Configuration(vec![
            ValidationError::new("circuit_breaker.failure_threshold", "must be greater than 0"),
            ValidationError::new("rate_limit.capacity", "must be greater than 0"),
        ]);
        assert_eq!(
            err.to_string(),
            "invalid configuration: circuit_breaker.failure_threshold: must be greater than 0, \
             rate_limit.capacity: must be greater than 0"
        );

        let err = TrafficError::RequiresAsync { policy: "token-bucket-remote".into() };
        assert!(err.to_string().contains("token-bucket-remote"));

        let err: TrafficError = StoreError::Unavailable("connection refused".into()).into();
        assert_eq!(err.to_string(), "token store unavailable: connection refused");
    }

    #[cfg(feature = "redis")]
    #[test]
    fn test_redis_connection_errors_are_unavailable() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = StoreError::from_redis(redis::RedisError::from(refused));
        assert!(matches!(err, StoreError::Unavailable(_)));

        let err = StoreError::from_redis(redis::RedisError::from((redis::ErrorKind::TypeError, "bad reply")));
        assert!(matches!(err, StoreError::Redis(_)));
    }
}
