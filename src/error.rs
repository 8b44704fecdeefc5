//! Error types for the pipeline orchestration core.
//!

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Messaging error: {0}")]
    MessagingError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Stage error: {0}")]
    StageError(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Whether the failure came from the persistence layer
    pub fn is_database(&self) -> bool {
        matches!(self, Self::DatabaseError(_))
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(error: serde_json::Error) -> Self {
        PipelineError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::DatabaseError(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for PipelineError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        PipelineError::DatabaseError(format!("migration failed: {err}"))
    }
}

impl From<MessagingError> for PipelineError {
    fn from(error: MessagingError) -> Self {
        PipelineError::MessagingError(error.to_string())
    }
}

impl From<ConfigurationError> for PipelineError {
    fn from(error: ConfigurationError) -> Self {
        PipelineError::ConfigurationError(error.to_string())
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messaging_error_conversion_keeps_message() {
        let err: PipelineError = MessagingError::publish("events", "channel closed").into();
        assert!(matches!(err, PipelineError::MessagingError(_)));
        assert!(err.to_string().contains("channel closed"));
    }

    #[test]
    fn test_json_error_maps_to_validation() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: PipelineError = json_err.into();
        assert!(matches!(err, PipelineError::ValidationError(_)));
        assert!(!err.is_database());
    }
}
