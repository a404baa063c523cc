//! HTTP error types

use crate::types::HttpMethodError;
use std::time::Duration;

/// Error type for HTTP operations
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(#[from] HttpMethodError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid header name: {0}")]
    InvalidHeaderName(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("No mock response for {0}")]
    MockNotFound(String),
}

impl HttpError {
    /// Whether the failure happened on the wire (as opposed to a bad request definition)
    pub fn is_transport(&self) -> bool {
        matches!(self, HttpError::NetworkError(_) | HttpError::Timeout(_))
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            HttpError::Timeout(_) => true,
            HttpError::NetworkError(e) => e.is_timeout(),
            _ => false,
        }
    }
}
