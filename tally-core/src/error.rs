//! Error types for Tally

use crate::consistency::Consistency;
use thiserror::Error;

/// Result type alias for Tally operations
pub type Result<T> = std::result::Result<T, TallyError>;

/// Tally error types
#[derive(Error, Debug)]
pub enum TallyError {
    /// Invalid or missing configuration (names, tables, session capabilities)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A null value was written under the `Error` null policy
    #[error("Null value for column {column} in table {table} not allowed by policy")]
    NullValue { table: String, column: String },

    /// Invalid argument passed to an operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The backend rejected or failed to apply a batch
    #[error("Storage error: {0}")]
    Storage(String),

    /// The backend is not reachable or has been shut down
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Not enough replicas to satisfy the requested consistency level
    #[error("Consistency {level} not satisfiable: {required} replicas required, {available} available")]
    ConsistencyUnsatisfiable {
        level: Consistency,
        required: usize,
        available: usize,
    },

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl TallyError {
    /// Check if error is retryable by the caller or the session
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TallyError::Storage(_)
                | TallyError::Unavailable(_)
                | TallyError::ConsistencyUnsatisfiable { .. }
        )
    }

    /// Check if error was raised while setting things up rather than writing
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TallyError::Config(_) | TallyError::ConfigParse(_) | TallyError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TallyError::NullValue {
            table: "users".into(),
            column: "email".into(),
        };
        assert_eq!(
            err.to_string(),
            "Null value for column email in table users not allowed by policy"
        );

        let err = TallyError::ConsistencyUnsatisfiable {
            level: Consistency::All,
            required: 3,
            available: 2,
        };
        assert_eq!(
            err.to_string(),
            "Consistency ALL not satisfiable: 3 replicas required, 2 available"
        );
    }

    #[test]
    fn test_error_kinds() {
        assert!(TallyError::Storage("rejected".into()).is_retryable());
        assert!(TallyError::Unavailable("closed".into()).is_retryable());
        assert!(!TallyError::Config("empty name".into()).is_retryable());
        assert!(TallyError::Config("empty name".into()).is_configuration());
        assert!(!TallyError::InvalidArgument("overflow".into()).is_configuration());
    }
}
