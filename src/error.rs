//! Error types and handling for Triphase
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for Triphase operations
pub type Result<T> = std::result::Result<T, TriphaseError>;

/// Main error type for Triphase
#[derive(Debug, Error)]
pub enum TriphaseError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Modbus communication errors (ADC front-end or relay board)
    #[error("Modbus error: {message}")]
    Modbus { message: String },

    /// HTTP/Web server errors
    #[error("Web server error: {message}")]
    Web { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl TriphaseError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        TriphaseError::Config {
            message: message.into(),
        }
    }

    /// Create a new Modbus error
    pub fn modbus<S: Into<String>>(message: S) -> Self {
        TriphaseError::Modbus {
            message: message.into(),
        }
    }

    /// Create a new web error
    pub fn web<S: Into<String>>(message: S) -> Self {
        TriphaseError::Web {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        TriphaseError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        TriphaseError::Io {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        TriphaseError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        TriphaseError::Generic {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for TriphaseError {
    fn from(err: std::io::Error) -> Self {
        TriphaseError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for TriphaseError {
    fn from(err: serde_yaml::Error) -> Self {
        TriphaseError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for TriphaseError {
    fn from(err: serde_json::Error) -> Self {
        TriphaseError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = TriphaseError::config("test config error");
        assert!(matches!(err, TriphaseError::Config { .. }));

        let err = TriphaseError::modbus("test modbus error");
        assert!(matches!(err, TriphaseError::Modbus { .. }));

        let err = TriphaseError::validation("field", "test validation error");
        assert!(matches!(err, TriphaseError::Validation { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = TriphaseError::config("test error");
        let error_string = format!("{}", err);
        assert_eq!(error_string, "Configuration error: test error");

        let err = TriphaseError::validation("test_field", "invalid value");
        let error_string = format!("{}", err);
        assert_eq!(error_string, "Validation error: test_field - invalid value");
    }
}
