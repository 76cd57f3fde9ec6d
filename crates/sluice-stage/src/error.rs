//! # Design
//!
//! - Provide structured, constant-message errors for external collaborators.
//! - Capture the program/url context so failures are reproducible in tests.
//! - Preserve source errors without interpolating context into messages.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for collaborator operations.
pub type StageResult<T> = Result<T, StageError>;

/// Errors produced by external collaborator adapters.
#[derive(Debug, Error)]
pub enum StageError {
    /// IO failures while preparing or inspecting tool directories.
    #[error("stage io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The tool process could not be spawned.
    #[error("tool spawn failed")]
    Spawn {
        /// Program that failed to start.
        program: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The tool exited with a non-zero status.
    #[error("tool exited non-zero")]
    ToolFailed {
        /// Program that failed.
        program: PathBuf,
        /// Exit code when the process was not signalled.
        code: Option<i32>,
    },
    /// The per-task deadline fired before the tool finished.
    #[error("tool deadline exceeded")]
    Timeout {
        /// Program that overran its deadline.
        program: PathBuf,
        /// Deadline that fired, in seconds.
        deadline_secs: u64,
    },
    /// The circuit breaker is open; the call was never made.
    #[error("tool circuit open")]
    CircuitOpen {
        /// Tool whose breaker rejected the call.
        tool: &'static str,
    },
    /// The uplink handle does not resolve to a staged payload.
    #[error("uplink payload missing")]
    MissingPayload {
        /// Handle that failed to resolve.
        handle: String,
    },
    /// The uplink handle is malformed.
    #[error("uplink handle invalid")]
    InvalidHandle {
        /// Handle that failed validation.
        handle: String,
    },
    /// HTTP delivery to the uplink failed.
    #[error("uplink http failure")]
    Http {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// URL used for the request.
        url: String,
        /// Underlying HTTP client error.
        source: reqwest::Error,
    },
    /// The uplink returned a non-success status.
    #[error("uplink http status error")]
    HttpStatus {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// URL used for the request.
        url: String,
        /// HTTP status code returned by the server.
        status: u16,
    },
}

impl StageError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Whether the failure came from the uplink's rate limiting.
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::HttpStatus { status: 429, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_detection_matches_status() {
        let limited = StageError::HttpStatus {
            operation: "send_message",
            url: "http://uplink".to_string(),
            status: 429,
        };
        assert!(limited.is_rate_limited());

        let other = StageError::HttpStatus {
            operation: "send_message",
            url: "http://uplink".to_string(),
            status: 500,
        };
        assert!(!other.is_rate_limited());
    }
}
