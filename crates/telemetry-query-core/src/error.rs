//! Error types for telemetry queries

use thiserror::Error;

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for telemetry query operations
#[derive(Error, Debug)]
pub enum Error {
    /// Request failed schema, bounds, or business-rule checks.
    /// Never sent over the wire.
    #[error("Validation error at {path}: {expected}")]
    Validation {
        /// Dotted path to the offending field (`$` for the request root)
        path: String,
        /// What the field was expected to look like
        expected: String,
    },

    /// No active account is bound to the call
    #[error("No active account context")]
    MissingContext,

    /// Network failure, non-success status, or backend rejection
    #[error("Transmission error: {message}")]
    Transmission {
        /// Human readable cause
        message: String,
        /// Status code returned by the backend, if one was received
        status: Option<u16>,
        /// The request body that was being sent
        query: Box<serde_json::Value>,
        /// Underlying transport error
        #[source]
        source: Option<reqwest::Error>,
    },

    /// Backend payload does not match the shape expected for the request
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a validation error
    pub fn validation(path: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            expected: expected.into(),
        }
    }

    /// Create a transmission error without an underlying transport error
    pub fn transmission(
        message: impl Into<String>,
        status: Option<u16>,
        query: &serde_json::Value,
    ) -> Self {
        Self::Transmission {
            message: message.into(),
            status,
            query: Box::new(query.clone()),
            source: None,
        }
    }

    /// Create a malformed response error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Short, stable name of the error kind, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::MissingContext => "missing_context",
            Self::Transmission { .. } => "transmission",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_names_path() {
        let err = Error::validation("parameters.limit", "integer <= 100");
        assert_eq!(
            err.to_string(),
            "Validation error at parameters.limit: integer <= 100"
        );
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_transmission_keeps_query() {
        let query = serde_json::json!({"queryId": "q1"});
        let err = Error::transmission("backend returned 503", Some(503), &query);

        match err {
            Error::Transmission { status, query, .. } => {
                assert_eq!(status, Some(503));
                assert_eq!(query["queryId"], "q1");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
