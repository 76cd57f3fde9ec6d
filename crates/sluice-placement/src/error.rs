//! # Design
//!
//! - Provide structured, constant-message errors for staging operations.
//! - Capture operation context (paths, fields) to make failures reproducible
//!   in tests.
//! - Preserve source errors without interpolating context into messages.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for staging operations.
pub type PlacementResult<T> = Result<T, PlacementError>;

/// Errors produced by the staging layer.
#[derive(Debug, Error)]
pub enum PlacementError {
    /// IO failures while interacting with the filesystem.
    #[error("placement io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The expected payload is not a regular file.
    #[error("placement expected a regular file")]
    NotAFile {
        /// Operation that made the check.
        operation: &'static str,
        /// Path that failed the check.
        path: PathBuf,
    },
    /// Input validation failures.
    #[error("placement invalid input")]
    InvalidInput {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Globset compilation failures for the deny-pattern policy.
    #[error("placement glob failure")]
    Glob {
        /// Glob pattern that failed to compile.
        pattern: String,
        /// Underlying globset error.
        source: globset::Error,
    },
    /// No free destination name could be derived within the attempt budget.
    #[error("placement destination exhausted")]
    DestinationExhausted {
        /// Directory the move targeted.
        directory: PathBuf,
        /// Candidate filename that kept colliding.
        file_name: String,
    },
}

impl PlacementError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn not_a_file(operation: &'static str, path: impl Into<PathBuf>) -> Self {
        Self::NotAFile {
            operation,
            path: path.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn placement_error_helpers_build_variants() {
        let io_err = PlacementError::io("read", "payload", io::Error::other("io"));
        assert!(matches!(io_err, PlacementError::Io { .. }));
        assert!(io_err.source().is_some());

        let file_err = PlacementError::not_a_file("stage", "dir");
        assert!(matches!(file_err, PlacementError::NotAFile { .. }));
        assert!(file_err.source().is_none());
    }
}
