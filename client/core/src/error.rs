//! API Error Types
//!
//! Failures surfaced by the HTTP client, the streaming session and the
//! research job API.
//!
//! The taxonomy keeps "never connected" apart from "connected but empty":
//! a non-success status is [`ApiError::Status`], a response without a
//! readable body is [`ApiError::NoBody`]. Malformed stream lines are not
//! errors at all; they are logged and skipped by the classifier.

use thiserror::Error;

/// Errors that can occur while talking to the platform API
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server answered with a non-success status
    #[error("Server returned {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Server-provided response text
        message: String,
    },

    /// The configured base URL cannot be used to build request URLs
    #[error("Invalid base URL: {0}")]
    InvalidUrl(String),

    /// The request never produced a response (connect, timeout, TLS, ...)
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The response carried no readable body
    #[error("Response has no body")]
    NoBody,

    /// Reading the response body failed part way through
    #[error("Stream read failed: {0}")]
    Read(String),

    /// A JSON response could not be parsed
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The caller cancelled before a response arrived
    #[error("Request cancelled")]
    Cancelled,
}

impl ApiError {
    /// HTTP status code, if the server answered at all
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the failure happened before any response body was read
    #[must_use]
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, Self::Status { .. } | Self::Request(_))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_display() {
        let err = ApiError::Status {
            status: 503,
            message: "backend warming up".to_string(),
        };
        assert_eq!(err.to_string(), "Server returned 503: backend warming up");
        assert_eq!(err.status(), Some(503));
        assert!(err.is_connect_failure());
    }

    #[test]
    fn test_no_body_is_distinct() {
        let err = ApiError::NoBody;
        assert_eq!(err.to_string(), "Response has no body");
        assert_eq!(err.status(), None);
        assert!(!err.is_connect_failure());
    }

    #[test]
    fn test_decode_from_serde() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{oops");
        let err: ApiError = parse.unwrap_err().into();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[test]
    fn test_cancelled_is_not_connect_failure() {
        assert!(!ApiError::Cancelled.is_connect_failure());
        assert_eq!(ApiError::Cancelled.to_string(), "Request cancelled");
    }
}
