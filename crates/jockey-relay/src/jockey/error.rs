//! Jockey client error types.

use reqwest::StatusCode;
use thiserror::Error;

/// Result type for Jockey operations.
pub type JockeyResult<T> = Result<T, JockeyError>;

/// Errors that can occur while talking to the Jockey API.
#[derive(Debug, Error)]
pub enum JockeyError {
    /// HTTP request failed (connect, timeout, body read).
    #[error("Connection error: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Jockey answered with a non-success status.
    #[error("Server error: {body}")]
    Status { status: StatusCode, body: String },

    /// Reading the response stream failed mid-way.
    #[error("Stream error: {0}")]
    Stream(#[from] std::io::Error),

    /// Failed to parse a response body.
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// No usable assistant was advertised by the server.
    #[error("No assistants available: {0}")]
    NoAssistant(String),

    /// A static asset URL was requested but none is configured.
    #[error("Jockey static URL is not configured")]
    StaticUrlMissing,
}

impl JockeyError {
    /// Whether the failure happened before a request was accepted and is
    /// worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            JockeyError::RequestFailed(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Upstream status, if the failure was a status error.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            JockeyError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
