//! Error types for the PostgreSQL billing backend.

use pmbridge_billing::BillingStoreError;
use sqlx_core::error::Error as SqlxError;

/// PostgreSQL error code for unique violation (23505).
pub const PG_UNIQUE_VIOLATION: &str = "23505";

/// Checks if a sqlx error has a specific PostgreSQL error code.
pub fn has_pg_error_code(err: &SqlxError, code: &str) -> bool {
    if let SqlxError::Database(db_err) = err {
        db_err.code().as_deref() == Some(code)
    } else {
        false
    }
}

pub fn is_unique_violation(err: &SqlxError) -> bool {
    has_pg_error_code(err, PG_UNIQUE_VIOLATION)
}

/// Errors raised while setting up the PostgreSQL backend.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    #[error("Database connection error: {0}")]
    Connection(#[from] SqlxError),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl PostgresError {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<PostgresError> for BillingStoreError {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Connection(e) => map_sqlx_error(e),
            PostgresError::Config { message } => {
                BillingStoreError::internal(format!("Configuration error: {message}"))
            }
        }
    }
}

/// Maps a query failure onto the storage error taxonomy.
pub(crate) fn map_sqlx_error(err: SqlxError) -> BillingStoreError {
    if is_unique_violation(&err) {
        return BillingStoreError::conflict(err.to_string());
    }
    match err {
        SqlxError::Io(_) | SqlxError::Tls(_) | SqlxError::PoolTimedOut | SqlxError::PoolClosed => {
            BillingStoreError::connection(err.to_string())
        }
        other => BillingStoreError::internal(other.to_string()),
    }
}

/// Result type alias for PostgreSQL setup operations.
pub type Result<T> = std::result::Result<T, PostgresError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_are_connection_errors() {
        assert!(map_sqlx_error(SqlxError::PoolTimedOut).is_transient());
        assert!(map_sqlx_error(SqlxError::PoolClosed).is_transient());
        assert!(!map_sqlx_error(SqlxError::RowNotFound).is_transient());
    }

    #[test]
    fn test_config_error_mapping() {
        let err: BillingStoreError = PostgresError::config("bad url").into();
        assert!(matches!(err, BillingStoreError::Internal(_)));
    }
}
