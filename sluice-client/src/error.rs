//! Error types for the Sluice client

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        status: u16,
        /// `error` field of the body, or the raw body
        message: String,
        /// Per-field messages of a validation error
        fields: BTreeMap<String, Vec<String>>,
    },

    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl ClientError {
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Build an API error from an error body
    ///
    /// The orchestrator answers `{"error": "...", "fields": {...}}`; any other
    /// body is kept verbatim.
    pub fn from_response(status: u16, body: &str) -> Self {
        let Ok(Value::Object(json)) = serde_json::from_str::<Value>(body) else {
            return Self::api_error(status, body);
        };
        let message = json
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or(body)
            .to_string();
        let fields = json
            .get("fields")
            .cloned()
            .and_then(|f| serde_json::from_value(f).ok())
            .unwrap_or_default();
        Self::ApiError {
            status,
            message,
            fields,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ApiError { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Already running, or a state change the orchestrator refused
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    /// Check if this error is a client error (4xx status)
    pub fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(status) if (400..500).contains(&status))
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self.status(), Some(status) if status >= 500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_body_is_parsed() {
        let err = ClientError::from_response(
            400,
            r#"{"error":"invalid job data","fields":{"count":["Enter a whole number."]}}"#,
        );
        let ClientError::ApiError { message, fields, .. } = &err else {
            panic!("expected an API error");
        };
        assert_eq!(message, "invalid job data");
        assert_eq!(fields["count"], vec!["Enter a whole number."]);
        assert!(err.is_client_error());
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_plain_body_is_kept() {
        let err = ClientError::from_response(502, "Bad Gateway");
        assert_eq!(err.to_string(), "API error (status 502): Bad Gateway");
        assert!(err.is_server_error());
        assert!(ClientError::api_error(409, "locked").is_conflict());
        assert!(ClientError::api_error(404, "gone").is_not_found());
    }
}
