//! Protocol-level errors and their reclassification into domain errors.

use pmbridge_core::DomainError;

/// Errors raised by the envelope builder and the protocol client.
#[derive(Debug, thiserror::Error)]
pub enum SoapError {
    /// Network failure before a response was received.
    #[error("Transport error calling {operation}: {message}")]
    Transport { operation: String, message: String },

    /// The attempt exceeded the configured timeout.
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Every action candidate was rejected as a binding mismatch.
    #[error("No action candidate accepted for {operation} after {attempts} attempts: {last_fault}")]
    ContractMismatch {
        operation: String,
        attempts: usize,
        last_fault: String,
    },

    /// The request could not be built. No remote call was made.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The client could not be constructed from its configuration.
    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),
}

pub type SoapResult<T> = Result<T, SoapError>;

impl SoapError {
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Returns `true` for failures a caller may retry as-is.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }
}

impl From<SoapError> for DomainError {
    fn from(err: SoapError) -> Self {
        match err {
            SoapError::ContractMismatch {
                operation,
                last_fault,
                ..
            } => DomainError::unsupported(operation, last_fault),
            SoapError::Validation(message) => DomainError::Validation(message),
            other => DomainError::remote(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reclassification() {
        let err: DomainError = SoapError::ContractMismatch {
            operation: "CreateCharge".into(),
            attempts: 8,
            last_fault: "ContractFilter mismatch".into(),
        }
        .into();
        assert!(err.is_unsupported());

        let err: DomainError = SoapError::Timeout {
            operation: "GetPatients".into(),
            timeout_ms: 20_000,
        }
        .into();
        assert!(err.is_retryable());

        let err: DomainError = SoapError::validation("unknown field").into();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn test_retryable() {
        assert!(SoapError::transport("GetPatients", "connection refused").is_retryable());
        assert!(!SoapError::validation("x").is_retryable());
    }
}
