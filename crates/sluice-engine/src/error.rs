//! # Design
//!
//! - Centralize engine-level errors for orchestration and admission.
//! - Map collaborator errors onto the persisted fault taxonomy in exactly one
//!   place (`StageFailure::from_*`), so retry decisions stay uniform.

use std::io;

use sluice_placement::PlacementError;
use sluice_stage::StageError;
use sluice_tasks::{DeadLetterReason, ErrorCategory, TaskFault, TaskStoreError};
use thiserror::Error;

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine-level error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Task store operations failed.
    #[error("task store operation failed")]
    Store {
        /// Operation identifier.
        operation: &'static str,
        /// Source store error.
        source: TaskStoreError,
    },
    /// Staging operations failed.
    #[error("staging operation failed")]
    Placement {
        /// Operation identifier.
        operation: &'static str,
        /// Source staging error.
        source: PlacementError,
    },
    /// The submitter is not on the static authorization list.
    #[error("submitter not authorised")]
    Unauthorized {
        /// Owner that was rejected.
        owner_id: i64,
    },
    /// A worker-pool queue is full; the caller should back off.
    #[error("worker queue full")]
    QueueFull {
        /// Stage whose queue rejected the submission.
        stage: &'static str,
    },
}

impl EngineError {
    pub(crate) const fn store(operation: &'static str, source: TaskStoreError) -> Self {
        Self::Store { operation, source }
    }

    pub(crate) const fn placement(operation: &'static str, source: PlacementError) -> Self {
        Self::Placement { operation, source }
    }
}

/// Classified outcome of a failed stage attempt, carried from the handler to
/// the orchestrator's single failure path.
#[derive(Debug, Clone)]
pub struct StageFailure {
    /// Fault recorded on the task if the attempt turns terminal.
    pub fault: TaskFault,
    /// Whether the retry policy may re-attempt.
    pub retryable: bool,
    /// Whether a per-task deadline produced the failure.
    pub timed_out: bool,
    /// Dead-letter reason override for failures whose classification cannot
    /// be derived from the category alone (e.g. corrupt archives).
    pub reason_override: Option<DeadLetterReason>,
}

impl StageFailure {
    /// Build a failure whose retryability follows the fault's category.
    #[must_use]
    pub const fn new(fault: TaskFault) -> Self {
        let retryable = fault.category.is_retryable();
        Self {
            fault,
            retryable,
            timed_out: false,
            reason_override: None,
        }
    }

    /// Build a terminal failure regardless of category.
    #[must_use]
    pub const fn terminal(fault: TaskFault) -> Self {
        Self {
            fault,
            retryable: false,
            timed_out: false,
            reason_override: None,
        }
    }

    /// Build a terminal failure with an explicit dead-letter reason.
    #[must_use]
    pub const fn terminal_with_reason(fault: TaskFault, reason: DeadLetterReason) -> Self {
        Self {
            fault,
            retryable: false,
            timed_out: false,
            reason_override: Some(reason),
        }
    }

    /// Build a failure produced by a per-task deadline.
    #[must_use]
    pub const fn deadline(fault: TaskFault) -> Self {
        Self {
            fault,
            retryable: true,
            timed_out: true,
            reason_override: None,
        }
    }

    /// Map a collaborator error onto the fault taxonomy.
    #[must_use]
    pub fn from_stage(source: &StageError) -> Self {
        match source {
            StageError::Timeout { program, deadline_secs } => Self::deadline(TaskFault::new(
                ErrorCategory::ExternalProcess,
                format!(
                    "{} exceeded its {deadline_secs}s deadline",
                    program.display()
                ),
            )),
            StageError::ToolFailed { program, code } => Self::new(TaskFault::new(
                ErrorCategory::ExternalProcess,
                format!("{} exited with status {code:?}", program.display()),
            )),
            StageError::Spawn { program, source } => Self::new(TaskFault::new(
                ErrorCategory::ExternalProcess,
                format!("{} failed to start: {source}", program.display()),
            )),
            StageError::CircuitOpen { tool } => Self::new(TaskFault::new(
                ErrorCategory::ExternalProcess,
                format!("{tool} circuit open; call suppressed"),
            )),
            StageError::Io { operation, path, source } => Self::from_io(operation, path, source),
            StageError::MissingPayload { handle } => Self::new(TaskFault::new(
                ErrorCategory::Network,
                format!("uplink payload for handle {handle} not staged yet"),
            )),
            StageError::InvalidHandle { handle } => Self::terminal(TaskFault::new(
                ErrorCategory::Validation,
                format!("uplink handle {handle} is malformed"),
            )),
            StageError::Http { operation, url, source } => Self::new(TaskFault::new(
                ErrorCategory::Network,
                format!("{operation} against {url} failed: {source}"),
            )),
            StageError::HttpStatus { operation, url, status } => {
                let category = if source.is_rate_limited() {
                    ErrorCategory::RateLimit
                } else {
                    ErrorCategory::Network
                };
                Self::new(TaskFault::new(
                    category,
                    format!("{operation} against {url} returned status {status}"),
                ))
            }
        }
    }

    /// Map a staging error onto the fault taxonomy.
    #[must_use]
    pub fn from_placement(source: &PlacementError) -> Self {
        match source {
            PlacementError::Io { operation, path, source } => {
                Self::from_io(operation, path, source)
            }
            PlacementError::NotAFile { operation, path } => Self::terminal(TaskFault::new(
                ErrorCategory::Validation,
                format!("{operation}: {} is not a regular file", path.display()),
            )),
            PlacementError::InvalidInput { field, reason, .. } => Self::terminal(TaskFault::new(
                ErrorCategory::Validation,
                format!("staging input {field} rejected: {reason}"),
            )),
            PlacementError::Glob { pattern, .. } => Self::terminal(TaskFault::new(
                ErrorCategory::Critical,
                format!("filename policy pattern {pattern} failed to compile"),
            )),
            PlacementError::DestinationExhausted { directory, file_name } => {
                Self::new(TaskFault::new(
                    ErrorCategory::FilesystemTransient,
                    format!(
                        "no free destination for {file_name} under {}",
                        directory.display()
                    ),
                ))
            }
        }
    }

    /// Map a store error onto the fault taxonomy.
    #[must_use]
    pub fn from_store(source: &TaskStoreError) -> Self {
        match source {
            TaskStoreError::Conflict { task_id, .. } => Self::terminal(TaskFault::new(
                ErrorCategory::Validation,
                format!("content hash already owned by another live task ({task_id})"),
            )),
            TaskStoreError::Gone { operation, task_id } => Self::terminal(TaskFault::new(
                ErrorCategory::Critical,
                format!("{operation}: task {task_id} vanished from the store"),
            )),
            TaskStoreError::Storage { operation, .. } => Self::new(TaskFault::new(
                ErrorCategory::Store,
                format!("{operation}: storage engine fault"),
            )),
            TaskStoreError::Corrupt { column, .. } => Self::terminal(TaskFault::new(
                ErrorCategory::Critical,
                format!("persisted column {column} is corrupt"),
            )),
            TaskStoreError::Migrate { .. } => Self::terminal(TaskFault::new(
                ErrorCategory::Critical,
                "migration failure outside startup".to_string(),
            )),
        }
    }

    fn from_io(operation: &str, path: &std::path::Path, source: &io::Error) -> Self {
        let category = match source.kind() {
            io::ErrorKind::PermissionDenied => ErrorCategory::FilesystemHard,
            io::ErrorKind::StorageFull => ErrorCategory::FilesystemHard,
            _ => ErrorCategory::FilesystemTransient,
        };
        Self::new(TaskFault::new(
            category,
            format!("{operation} on {} failed: {source}", path.display()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn timeouts_are_retryable_and_flagged() {
        let failure = StageFailure::from_stage(&StageError::Timeout {
            program: PathBuf::from("/usr/bin/extract"),
            deadline_secs: 1_800,
        });
        assert!(failure.retryable);
        assert!(failure.timed_out);
        assert_eq!(failure.fault.category, ErrorCategory::ExternalProcess);
    }

    #[test]
    fn invalid_handles_are_terminal() {
        let failure = StageFailure::from_stage(&StageError::InvalidHandle {
            handle: "../x".to_string(),
        });
        assert!(!failure.retryable);
        assert_eq!(failure.fault.category, ErrorCategory::Validation);
    }

    #[test]
    fn rate_limits_map_to_their_own_category() {
        let failure = StageFailure::from_stage(&StageError::HttpStatus {
            operation: "send_message",
            url: "http://uplink".to_string(),
            status: 429,
        });
        assert_eq!(failure.fault.category, ErrorCategory::RateLimit);
        assert!(failure.retryable);
    }

    #[test]
    fn permission_denied_io_is_hard() {
        let failure = StageFailure::from_placement(&PlacementError::Io {
            operation: "move_file.create",
            path: PathBuf::from("/protected"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        });
        assert!(!failure.retryable);
        assert_eq!(failure.fault.category, ErrorCategory::FilesystemHard);
    }

    #[test]
    fn store_conflicts_turn_into_duplicate_validation() {
        let failure = StageFailure::from_store(&TaskStoreError::Conflict {
            operation: "store.update",
            task_id: uuid::Uuid::nil(),
        });
        assert!(!failure.retryable);
        assert_eq!(failure.fault.category, ErrorCategory::Validation);
    }
}
