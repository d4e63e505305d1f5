//! Domain error taxonomy.
//!
//! Protocol and transport failures are reclassified at the protocol client
//! boundary, so domain callers only ever see the variants below.

use std::fmt;

use thiserror::Error;

use crate::scheduling::SchedulingError;

/// Errors surfaced to domain-level callers.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The remote service explicitly rejected the operation.
    #[error("{operation} rejected by remote service: {message}")]
    BusinessFault { operation: String, message: String },

    /// A required domain field was missing or malformed. No remote call was made.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The remote service does not implement the operation for this contract version.
    #[error("{operation} is not supported by the remote service: {message}")]
    Unsupported { operation: String, message: String },

    /// Network, timeout or any other remote failure. Retryable by the caller.
    #[error("Remote call failed: {0}")]
    Remote(String),

    /// The response could not be parsed.
    #[error("Malformed response: {0}")]
    Parse(String),

    /// The remote service returned no record for the requested id.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
}

pub type Result<T> = std::result::Result<T, DomainError>;

impl DomainError {
    pub fn business_fault(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BusinessFault {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unsupported(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Returns `true` if the remote service reported the operation as unsupported.
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    /// Returns `true` if re-invoking the same call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::BusinessFault { .. } => ErrorCategory::Business,
            Self::Validation(_) | Self::Scheduling(_) => ErrorCategory::Validation,
            Self::Unsupported { .. } => ErrorCategory::Unsupported,
            Self::Remote(_) => ErrorCategory::Transport,
            Self::Parse(_) => ErrorCategory::Protocol,
            Self::NotFound { .. } => ErrorCategory::NotFound,
        }
    }
}

/// Categories of domain errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Business,
    Validation,
    Unsupported,
    Transport,
    Protocol,
    NotFound,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Business => write!(f, "business"),
            Self::Validation => write!(f, "validation"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::Transport => write!(f, "transport"),
            Self::Protocol => write!(f, "protocol"),
            Self::NotFound => write!(f, "not_found"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::business_fault("CreatePatient", "Duplicate patient");
        assert_eq!(
            err.to_string(),
            "CreatePatient rejected by remote service: Duplicate patient"
        );

        let err = DomainError::not_found("Patient", "42");
        assert_eq!(err.to_string(), "Patient not found: 42");
    }

    #[test]
    fn test_error_predicates() {
        assert!(DomainError::remote("timed out").is_retryable());
        assert!(!DomainError::business_fault("GetPatient", "nope").is_retryable());
        assert!(DomainError::unsupported("CreateCharge", "mismatch").is_unsupported());
        assert!(!DomainError::validation("missing").is_unsupported());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            DomainError::validation("x").category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            DomainError::unsupported("CreateCharge", "x").category(),
            ErrorCategory::Unsupported
        );
        assert_eq!(DomainError::remote("x").category().to_string(), "transport");
    }
}
