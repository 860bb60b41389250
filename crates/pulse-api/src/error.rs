//! Error types for the backend client.

use thiserror::Error;

use crate::Method;

/// Errors that can occur when talking to the backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed before a response was received.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend answered with a non-success status.
    #[error("{method} {path} failed ({status}): {message}")]
    Status {
        method: Method,
        path: String,
        status: u16,
        message: String,
    },

    /// Response body did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Base URL could not be used.
    #[error("invalid base URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// HTTP status code, when the backend answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the request timed out in the transport.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Http(e) if e.is_timeout())
    }

    /// Whether the backend reported the addressed resource as missing.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}
