//! Task, audit, and dead-letter data carriers.
//!
//! # Design
//! - Value-copy reads: workers receive owned snapshots from the store and
//!   never share a mutable task between hands.
//! - Identity fields are set at creation and never mutated afterwards.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sluice_events::TaskStatus;
use uuid::Uuid;

use crate::fault::{DeadLetterReason, TaskFault};

/// Declared payload classes the pipeline accepts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TypeClass {
    /// Archive payload routed through the external extractor.
    Archive,
    /// Plain-text payload that skips extraction.
    Text,
}

impl TypeClass {
    /// Label persisted in the `file_type` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Archive => "archive",
            Self::Text => "text",
        }
    }

    /// Parse a persisted label back into a class.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "archive" => Some(Self::Archive),
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

/// A single submitted payload's end-to-end processing record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    /// Opaque unique identifier.
    pub id: Uuid,
    /// Identifier of the submitter.
    pub owner_id: i64,
    /// Identifier of the reply channel.
    pub channel_id: i64,
    /// Original filename supplied by the uplink.
    pub file_name: String,
    /// Size declared by the uplink, in bytes.
    pub file_size: i64,
    /// Declared payload class.
    pub type_class: TypeClass,
    /// Opaque handle the uplink uses to locate the staged bytes.
    pub uplink_handle: String,
    /// Digest of the fetched bytes; set once on successful download.
    pub content_hash: Option<String>,
    /// Current on-disk location while the payload is owned by the pipeline.
    pub staged_path: Option<PathBuf>,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Classified fault recorded on the latest transition into `FAILED`.
    pub fault: Option<TaskFault>,
    /// Monotonic count of attempts that reached a worker.
    pub retry_count: i64,
    /// Whether a completion notice has been delivered.
    pub notified: bool,
    /// Admission timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last committed mutation.
    pub updated_at: DateTime<Utc>,
    /// Timestamp of the terminal transition, when one happened.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Build a freshly admitted task in `PENDING`.
    #[must_use]
    pub fn new(
        owner_id: i64,
        channel_id: i64,
        file_name: impl Into<String>,
        file_size: i64,
        type_class: TypeClass,
        uplink_handle: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            channel_id,
            file_name: file_name.into(),
            file_size,
            type_class,
            uplink_handle: uplink_handle.into(),
            content_hash: None,
            staged_path: None,
            status: TaskStatus::Pending,
            fault: None,
            retry_count: 0,
            notified: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Aggregate task counts surfaced on the operator interface.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounts {
    /// Tasks awaiting a download worker.
    pub pending: i64,
    /// Tasks currently owned by the download pool.
    pub downloading: i64,
    /// Tasks staged and awaiting promotion.
    pub downloaded: i64,
    /// Terminally completed tasks.
    pub completed: i64,
    /// Terminally failed tasks.
    pub failed: i64,
}

impl StatusCounts {
    /// Record one status bucket.
    pub(crate) const fn set(&mut self, status: TaskStatus, count: i64) {
        match status {
            TaskStatus::Pending => self.pending = count,
            TaskStatus::Downloading => self.downloading = count,
            TaskStatus::Downloaded => self.downloaded = count,
            TaskStatus::Completed => self.completed = count,
            TaskStatus::Failed => self.failed = count,
        }
    }

    /// Total across all buckets.
    #[must_use]
    pub const fn total(&self) -> i64 {
        self.pending + self.downloading + self.downloaded + self.completed + self.failed
    }
}

/// Append-only audit entry; one row per transition, admin action, or
/// processing milestone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Row identifier.
    pub id: i64,
    /// Task the entry refers to, when applicable.
    pub task_id: Option<Uuid>,
    /// Actor that triggered the entry, when applicable.
    pub actor_id: Option<i64>,
    /// Machine-friendly action name (e.g. `transition`, `reconcile_demote`).
    pub action: String,
    /// Status before the action, when applicable.
    pub old_status: Option<TaskStatus>,
    /// Status after the action, when applicable.
    pub new_status: Option<TaskStatus>,
    /// Free-form detail.
    pub detail: String,
    /// Timestamp the entry was appended.
    pub created_at: DateTime<Utc>,
}

/// Payload for appending an audit entry.
#[derive(Debug, Clone, Default)]
pub struct NewAudit {
    /// Task the entry refers to, when applicable.
    pub task_id: Option<Uuid>,
    /// Actor that triggered the entry, when applicable.
    pub actor_id: Option<i64>,
    /// Machine-friendly action name.
    pub action: &'static str,
    /// Status before the action, when applicable.
    pub old_status: Option<TaskStatus>,
    /// Status after the action, when applicable.
    pub new_status: Option<TaskStatus>,
    /// Free-form detail.
    pub detail: String,
}

impl NewAudit {
    /// Entry describing a committed status transition.
    #[must_use]
    pub const fn transition(task_id: Uuid, from: TaskStatus, to: TaskStatus, detail: String) -> Self {
        Self {
            task_id: Some(task_id),
            actor_id: None,
            action: "transition",
            old_status: Some(from),
            new_status: Some(to),
            detail,
        }
    }

    /// Entry describing a processing milestone that did not change status.
    #[must_use]
    pub const fn milestone(task_id: Uuid, action: &'static str, detail: String) -> Self {
        Self {
            task_id: Some(task_id),
            actor_id: None,
            action,
            old_status: None,
            new_status: None,
            detail,
        }
    }
}

/// Snapshot of a terminally failed task captured in the dead-letter table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Row identifier.
    pub id: i64,
    /// Task the record references.
    pub task_id: Uuid,
    /// Submitter at time of failure.
    pub owner_id: i64,
    /// Reply channel at time of failure.
    pub channel_id: i64,
    /// Original filename at time of failure.
    pub file_name: String,
    /// Declared payload class at time of failure.
    pub file_type: TypeClass,
    /// Content digest, when the payload was ever hashed.
    pub file_hash: Option<String>,
    /// Classified removal reason.
    pub reason: DeadLetterReason,
    /// Whether an operator may re-inject the task.
    pub can_retry: bool,
    /// Whether the record needs manual attention.
    pub requires_manual: bool,
    /// Terminal fault captured with the snapshot.
    pub fault: TaskFault,
    /// Opaque context bag captured by the orchestrator.
    pub context: Option<Value>,
    /// Timestamp the record was captured.
    pub created_at: DateTime<Utc>,
}

/// Payload for capturing a dead-letter record.
#[derive(Debug, Clone)]
pub struct NewDeadLetter {
    /// Task being removed from the main queue.
    pub task_id: Uuid,
    /// Submitter at time of failure.
    pub owner_id: i64,
    /// Reply channel at time of failure.
    pub channel_id: i64,
    /// Original filename at time of failure.
    pub file_name: String,
    /// Declared payload class at time of failure.
    pub file_type: TypeClass,
    /// Content digest, when the payload was ever hashed.
    pub file_hash: Option<String>,
    /// Classified removal reason.
    pub reason: DeadLetterReason,
    /// Terminal fault captured with the snapshot.
    pub fault: TaskFault,
    /// Opaque context bag captured by the orchestrator.
    pub context: Option<Value>,
}

impl NewDeadLetter {
    /// Capture a dead-letter payload from a task and its terminal fault.
    #[must_use]
    pub fn capture(
        task: &Task,
        reason: DeadLetterReason,
        fault: TaskFault,
        context: Option<Value>,
    ) -> Self {
        Self {
            task_id: task.id,
            owner_id: task.owner_id,
            channel_id: task.channel_id,
            file_name: task.file_name.clone(),
            file_type: task.type_class,
            file_hash: task.content_hash.clone(),
            reason,
            fault,
            context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::ErrorCategory;

    #[test]
    fn new_task_starts_pending_and_clean() {
        let task = Task::new(1_001, 1_001, "creds.txt", 1_048_576, TypeClass::Text, "h1");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.staged_path.is_none());
        assert!(task.content_hash.is_none());
        assert_eq!(task.retry_count, 0);
        assert!(!task.notified);
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn status_counts_accumulate() {
        let mut counts = StatusCounts::default();
        counts.set(TaskStatus::Pending, 2);
        counts.set(TaskStatus::Failed, 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn dead_letter_capture_copies_identity() {
        let task = Task::new(7, 9, "a.zip", 10, TypeClass::Archive, "h2");
        let fault = TaskFault::new(ErrorCategory::ExternalProcess, "exit 2");
        let letter = NewDeadLetter::capture(&task, DeadLetterReason::MaxRetries, fault, None);
        assert_eq!(letter.task_id, task.id);
        assert_eq!(letter.file_name, "a.zip");
        assert_eq!(letter.file_type, TypeClass::Archive);
    }
}
