//! Error type system for Mangoon
//!
//! This module provides:
//! - A single error enum shared by the archive reader, the plugin system and the stores
//! - Error classification helpers used when logging contained failures
//! - A serializable error summary for CLI output

use serde::{Deserialize, Serialize};

/// Main error type for the Mangoon core
#[derive(Debug, thiserror::Error)]
pub enum MangoonError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    // Archive errors
    #[error("Failed to open archive: {0}")]
    ArchiveOpenError(String),

    // Plugin-related errors
    #[error("Invalid configuration: {}", .0.join(", "))]
    InvalidConfiguration(Vec<String>),

    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Plugin instantiation failed: {0}")]
    PluginInstantiationError(String),

    #[error("Plugin execution error: {0}")]
    PluginExecutionError(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // I/O errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Task error: {0}")]
    TaskError(String),
}

impl MangoonError {
    /// Get the error type name used in logs and CLI output
    pub fn error_type(&self) -> &'static str {
        match self {
            MangoonError::ConfigError(_) => "ConfigError",
            MangoonError::DatabaseError(_) => "DatabaseError",
            MangoonError::ArchiveOpenError(_) => "ArchiveOpenError",
            MangoonError::InvalidConfiguration(_) => "InvalidConfiguration",
            MangoonError::PluginNotFound(_) => "PluginNotFound",
            MangoonError::PluginInstantiationError(_) => "PluginInstantiationError",
            MangoonError::PluginExecutionError(_) => "PluginExecutionError",
            MangoonError::NotFound(_) => "NotFound",
            MangoonError::IoError(_) => "IoError",
            MangoonError::NetworkError(_) => "NetworkError",
            MangoonError::SerializationError(_) => "SerializationError",
            MangoonError::ValidationError(_) => "ValidationError",
            MangoonError::TaskError(_) => "TaskError",
        }
    }

    /// Numeric code recorded in a plugin's error log
    pub fn code(&self) -> i64 {
        match self {
            MangoonError::NetworkError(_) => 1,
            MangoonError::SerializationError(_) => 2,
            MangoonError::ValidationError(_) | MangoonError::InvalidConfiguration(_) => 3,
            MangoonError::DatabaseError(_) => 4,
            MangoonError::IoError(_) => 5,
            _ => 0,
        }
    }

    /// Violation messages carried by an `InvalidConfiguration` error
    pub fn violations(&self) -> Option<&[String]> {
        match self {
            MangoonError::InvalidConfiguration(messages) => Some(messages),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for MangoonError {
    fn from(err: serde_json::Error) -> Self {
        MangoonError::SerializationError(err.to_string())
    }
}

/// Serializable error summary for CLI output
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Individual violations of a rejected configuration
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
}

impl ErrorResponse {
    /// Create an error response from a MangoonError
    pub fn from_error(error: &MangoonError) -> Self {
        Self {
            error: error.error_type().to_string(),
            message: error.to_string(),
            violations: error.violations().map(<[String]>::to_vec).unwrap_or_default(),
        }
    }
}

/// Result type alias for operations that can fail with MangoonError
pub type Result<T> = std::result::Result<T, MangoonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_configuration_joins_all_messages() {
        let error = MangoonError::InvalidConfiguration(vec![
            "The enabled field must be true or false.".to_string(),
            "The timeout field must be an integer.".to_string(),
        ]);

        assert_eq!(
            error.to_string(),
            "Invalid configuration: The enabled field must be true or false., The timeout field must be an integer."
        );
        assert_eq!(error.violations().map(|v| v.len()), Some(2));
    }

    #[test]
    fn test_error_types() {
        assert_eq!(
            MangoonError::PluginNotFound("test".into()).error_type(),
            "PluginNotFound"
        );
        assert_eq!(
            MangoonError::ArchiveOpenError("test".into()).error_type(),
            "ArchiveOpenError"
        );
    }

    #[test]
    fn test_error_response_creation() {
        let response = ErrorResponse::from_error(&MangoonError::PluginNotFound("mangadex".into()));
        assert_eq!(response.error, "PluginNotFound");
        assert!(response.message.contains("mangadex"));
        assert!(response.violations.is_empty());
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({
                "error": "PluginNotFound",
                "message": "Plugin not found: mangadex",
            })
        );
    }

    #[test]
    fn test_error_response_lists_violations() {
        let response = ErrorResponse::from_error(&MangoonError::InvalidConfiguration(vec![
            "The timeout field is required.".to_string(),
        ]));
        assert_eq!(response.error, "InvalidConfiguration");
        assert_eq!(response.violations, vec!["The timeout field is required.".to_string()]);
    }
}
