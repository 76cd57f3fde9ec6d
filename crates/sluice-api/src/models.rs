//! Wire models for the operator surface.

use serde::{Deserialize, Serialize};
use sluice_tasks::{DeadLetter, Task};
use sluice_telemetry::MetricsSnapshot;

/// Body of `GET /healthz`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok` or `degraded`.
    pub status: &'static str,
    /// Build identifier recorded at logging init.
    pub build_sha: &'static str,
    /// Selected gauge/counter snapshot.
    pub metrics: MetricsSnapshot,
    /// Dependencies not currently available.
    pub degraded: Vec<String>,
}

/// Body of `POST /api/tasks`.
#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    /// Identifier of the submitter.
    pub owner_id: i64,
    /// Identifier of the reply channel.
    pub channel_id: i64,
    /// Original filename.
    pub file_name: String,
    /// Declared size in bytes.
    pub file_size: i64,
    /// `archive` or `text`.
    pub file_type: String,
    /// Uplink file handle.
    pub uplink_handle: String,
}

/// Task representation returned by the operator surface.
#[derive(Debug, Serialize)]
pub struct TaskView {
    /// Task identifier.
    pub id: String,
    /// Submitter identifier.
    pub owner_id: i64,
    /// Reply channel identifier.
    pub channel_id: i64,
    /// Original filename.
    pub file_name: String,
    /// Declared size in bytes.
    pub file_size: i64,
    /// Declared payload class label.
    pub file_type: &'static str,
    /// Lifecycle status label.
    pub status: &'static str,
    /// Content digest, when hashed.
    pub file_hash: Option<String>,
    /// Current staged path, when owned by the pipeline.
    pub staged_path: Option<String>,
    /// Retry attempts granted so far.
    pub retry_count: i64,
    /// Whether the completion notice went out.
    pub notified: bool,
    /// Terminal fault message, when failed.
    pub error_message: Option<String>,
    /// Terminal fault category label, when failed.
    pub error_category: Option<&'static str>,
    /// Admission timestamp (RFC 3339).
    pub created_at: String,
    /// Terminal timestamp (RFC 3339), when terminal.
    pub completed_at: Option<String>,
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.to_string(),
            owner_id: task.owner_id,
            channel_id: task.channel_id,
            file_name: task.file_name.clone(),
            file_size: task.file_size,
            file_type: task.type_class.as_str(),
            status: task.status.as_str(),
            file_hash: task.content_hash.clone(),
            staged_path: task
                .staged_path
                .as_ref()
                .map(|path| path.to_string_lossy().into_owned()),
            retry_count: task.retry_count,
            notified: task.notified,
            error_message: task.fault.as_ref().map(|fault| fault.message.clone()),
            error_category: task.fault.as_ref().map(|fault| fault.category.as_str()),
            created_at: task.created_at.to_rfc3339(),
            completed_at: task.completed_at.map(|at| at.to_rfc3339()),
        }
    }
}

/// Dead-letter representation returned by the operator surface.
#[derive(Debug, Serialize)]
pub struct DeadLetterView {
    /// Row identifier.
    pub id: i64,
    /// Task the record references.
    pub task_id: String,
    /// Original filename at time of failure.
    pub file_name: String,
    /// Classified removal reason label.
    pub reason: &'static str,
    /// Whether an operator may re-inject the task.
    pub can_retry: bool,
    /// Whether the record needs manual attention.
    pub requires_manual: bool,
    /// Terminal fault message.
    pub error_message: String,
    /// Capture timestamp (RFC 3339).
    pub created_at: String,
}

impl From<&DeadLetter> for DeadLetterView {
    fn from(letter: &DeadLetter) -> Self {
        Self {
            id: letter.id,
            task_id: letter.task_id.to_string(),
            file_name: letter.file_name.clone(),
            reason: letter.reason.as_str(),
            can_retry: letter.can_retry,
            requires_manual: letter.requires_manual,
            error_message: letter.fault.message.clone(),
            created_at: letter.created_at.to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_tasks::{TaskStatus, TypeClass};

    #[test]
    fn task_view_mirrors_task_fields() {
        let mut task = Task::new(9, 10, "a.zip", 100, TypeClass::Archive, "h");
        task.status = TaskStatus::Downloaded;
        task.content_hash = Some("abcd".to_string());

        let view = TaskView::from(&task);
        assert_eq!(view.status, "DOWNLOADED");
        assert_eq!(view.file_type, "archive");
        assert_eq!(view.file_hash.as_deref(), Some("abcd"));
        assert!(view.completed_at.is_none());
    }
}
