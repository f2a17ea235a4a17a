//! Error types for the wallet anomaly pipeline

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the pipeline
///
/// Only fatal conditions live here. Per-row validation failures are
/// collected as [`crate::features::SkipReason`] counts and never abort a run.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Invalid regex pattern in title rule `{rule}`: {message}")]
    InvalidRegex { rule: String, message: String },

    // Tabular I/O errors
    #[error("CSV error: {0}")]
    Csv(String),

    #[error("Missing column in ranked table: {0}")]
    MissingColumn(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Shorthand for a parameter validation failure
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// Check if this error comes from configuration (fatal before scoring)
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidParameter { .. } | Error::InvalidRegex { .. }
        )
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Error::Csv(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
