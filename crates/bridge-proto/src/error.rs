//! Typed errors shared across client and server.
//!
//! Every error the bridge can surface is a variant of `BridgeError`. On the
//! server these are converted into `ResponseEnvelope::err(..)` before
//! publishing (workers never propagate failures out of their execution
//! frame). On the client they surface as a call-level `Result::Err`.

use thiserror::Error;

/// Sub-cause of a `ValidationRejected` error, from the SQL validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCause {
    OversizedQuery,
    CommandPolicy,
    InjectionSuspected,
    StructureViolation,
}

impl std::fmt::Display for ValidationCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ValidationCause::OversizedQuery => "oversized query",
            ValidationCause::CommandPolicy => "command policy violation",
            ValidationCause::InjectionSuspected => "potential SQL injection detected",
            ValidationCause::StructureViolation => "structural violation",
        };
        f.write_str(s)
    }
}

/// Coarse classification attached to a validation outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("malformed DSN: {0}")]
    MalformedDsn(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("unsupported request type: {0}")]
    UnsupportedType(String),

    #[error("correlation id mismatch: expected {expected}, got {actual}")]
    CorrelationMismatch { expected: String, actual: String },

    #[error("request timed out")]
    Timeout,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("worker queue is full")]
    QueueFull,

    #[error("{cause}: {detail}")]
    ValidationRejected {
        cause: ValidationCause,
        detail: String,
    },

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("arity mismatch for {name}: expected {expected}, got {actual}")]
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("type mismatch for parameter {position} of {name}: expected {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        position: usize,
        expected: String,
        actual: String,
    },

    #[error("database error: {0}")]
    DbError(String),

    #[error("subprocess error: {0}")]
    SubprocessError(String),

    #[error("empty command")]
    EmptyCommand,

    #[error("broker error: {0}")]
    BrokerError(String),

    #[error("connection lost")]
    ConnectionLost,

    #[error("internal: {0}")]
    Internal(String),
}

impl BridgeError {
    pub fn validation(cause: ValidationCause, detail: impl Into<String>) -> Self {
        Self::ValidationRejected {
            cause,
            detail: detail.into(),
        }
    }

    /// Coarse risk classification for a validation failure; injection
    /// matches are always `critical`, everything else scales with cause.
    pub fn risk_level(&self) -> Option<RiskLevel> {
        match self {
            BridgeError::ValidationRejected { cause, .. } => Some(match cause {
                ValidationCause::InjectionSuspected => RiskLevel::Critical,
                ValidationCause::CommandPolicy => RiskLevel::High,
                ValidationCause::StructureViolation => RiskLevel::Medium,
                ValidationCause::OversizedQuery => RiskLevel::Low,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injection_is_critical_risk() {
        let err = BridgeError::validation(ValidationCause::InjectionSuspected, "union select");
        assert_eq!(err.risk_level(), Some(RiskLevel::Critical));
        assert!(err.to_string().contains("injection"));
    }

    #[test]
    fn rate_limited_message_matches_spec_wording() {
        let err = BridgeError::RateLimited;
        assert_eq!(err.to_string(), "Rate limit exceeded");
    }
}
