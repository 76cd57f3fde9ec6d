//! # Design
//!
//! - Provide structured, constant-message errors for the task store.
//! - Capture the failing operation so storage faults are reproducible in
//!   tests without interpolating context into messages.

use thiserror::Error;
use uuid::Uuid;

/// Result type for task store operations.
pub type TaskStoreResult<T> = Result<T, TaskStoreError>;

/// Errors produced by the task store.
#[derive(Debug, Error)]
pub enum TaskStoreError {
    /// A row with the same identity (or live content hash) already exists.
    #[error("task store conflict")]
    Conflict {
        /// Operation that hit the conflict.
        operation: &'static str,
        /// Task the operation was acting on.
        task_id: Uuid,
    },
    /// The referenced task does not exist.
    #[error("task not found")]
    Gone {
        /// Operation that missed the row.
        operation: &'static str,
        /// Task the operation was acting on.
        task_id: Uuid,
    },
    /// The underlying storage engine failed; the attempt never happened.
    #[error("task store failure")]
    Storage {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Underlying sqlx error.
        source: sqlx::Error,
    },
    /// A persisted row could not be decoded into the task model.
    #[error("task row corrupt")]
    Corrupt {
        /// Column that failed to decode.
        column: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Migrations could not be applied at open.
    #[error("task store migration failed")]
    Migrate {
        /// Underlying migration error.
        source: sqlx::migrate::MigrateError,
    },
}

impl TaskStoreError {
    pub(crate) const fn storage(operation: &'static str, source: sqlx::Error) -> Self {
        Self::Storage { operation, source }
    }

    pub(crate) const fn conflict(operation: &'static str, task_id: Uuid) -> Self {
        Self::Conflict { operation, task_id }
    }

    pub(crate) const fn gone(operation: &'static str, task_id: Uuid) -> Self {
        Self::Gone { operation, task_id }
    }

    pub(crate) fn corrupt(column: &'static str, value: impl Into<String>) -> Self {
        Self::Corrupt {
            column,
            value: Some(value.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_helpers_build_variants() {
        let id = Uuid::nil();
        assert!(matches!(
            TaskStoreError::conflict("create", id),
            TaskStoreError::Conflict { .. }
        ));
        assert!(matches!(
            TaskStoreError::gone("transition", id),
            TaskStoreError::Gone { .. }
        ));
        assert!(matches!(
            TaskStoreError::corrupt("status", "BOGUS"),
            TaskStoreError::Corrupt { .. }
        ));
    }
}
