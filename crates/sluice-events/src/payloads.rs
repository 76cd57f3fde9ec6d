//! Event payload types carried across the pipeline.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Identifier assigned to each event emitted by the pipeline.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Lifecycle states a task moves through while owned by the pipeline.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task has been accepted but no worker has picked it up yet.
    Pending,
    /// A download worker currently owns the task.
    Downloading,
    /// Payload is staged on disk and awaits promotion to the extract stage.
    Downloaded,
    /// All stages finished and the terminal artifact is in place.
    Completed,
    /// Task terminated with a classified fault.
    Failed,
}

impl TaskStatus {
    /// Uppercase label persisted in the task store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Downloading => "DOWNLOADING",
            Self::Downloaded => "DOWNLOADED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Whether the status is terminal (no further worker will touch the task).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Processing stages, each backed by exactly one worker pool.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Fetch the payload from the uplink staging area.
    Download,
    /// Run the external extractor over archive payloads.
    Extract,
    /// Run the external converter to produce the terminal artifact.
    Convert,
}

impl Stage {
    /// Lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Extract => "extract",
            Self::Convert => "convert",
        }
    }
}

/// Typed domain events surfaced across the pipeline.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A task was admitted into the pipeline.
    TaskCreated {
        /// Identifier of the new task.
        task_id: Uuid,
        /// Original filename supplied by the uplink.
        file_name: String,
    },
    /// A task moved between lifecycle states.
    StatusChanged {
        /// Identifier of the task whose status changed.
        task_id: Uuid,
        /// Status before the transition.
        from: TaskStatus,
        /// Status after the transition.
        to: TaskStatus,
    },
    /// A worker began processing a task at the given stage.
    StageStarted {
        /// Identifier of the task being processed.
        task_id: Uuid,
        /// Stage the worker is running.
        stage: Stage,
    },
    /// A stage finished successfully for a task.
    StageCompleted {
        /// Identifier of the processed task.
        task_id: Uuid,
        /// Stage that completed.
        stage: Stage,
    },
    /// A stage attempt failed; the retry policy decides what happens next.
    StageFailed {
        /// Identifier of the task whose stage attempt failed.
        task_id: Uuid,
        /// Stage that failed.
        stage: Stage,
        /// Human-readable failure detail.
        message: String,
    },
    /// A task reached its terminal artifact.
    TaskCompleted {
        /// Identifier of the completed task.
        task_id: Uuid,
        /// Absolute path of the terminal artifact.
        output_path: String,
    },
    /// A task was terminally removed from the main queue.
    TaskDeadLettered {
        /// Identifier of the dead-lettered task.
        task_id: Uuid,
        /// Classified dead-letter reason.
        reason: String,
    },
    /// An external dependency changed health status.
    DependencyChanged {
        /// Registered dependency name.
        name: String,
        /// New status label (`available`, `degraded`, `unavailable`).
        status: String,
    },
    /// An operation was deferred because its dependency is offline.
    FallbackQueued {
        /// Registered dependency name.
        name: String,
        /// Operation that was deferred.
        operation: String,
    },
    /// A batched completion notice was delivered to a channel.
    NotificationSent {
        /// Reply channel the batch was delivered to.
        channel_id: i64,
        /// Number of tasks covered by the batch.
        tasks: usize,
    },
    /// A staging directory sweep removed stale entries.
    SweepCompleted {
        /// Directory that was swept.
        directory: String,
        /// Number of entries removed.
        removed: usize,
    },
    /// System health status changed (degraded or restored components).
    HealthChanged {
        /// Components currently considered degraded.
        degraded: Vec<String>,
    },
}

impl Event {
    /// Machine-friendly discriminator for log and metric consumers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "task_created",
            Self::StatusChanged { .. } => "status_changed",
            Self::StageStarted { .. } => "stage_started",
            Self::StageCompleted { .. } => "stage_completed",
            Self::StageFailed { .. } => "stage_failed",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskDeadLettered { .. } => "task_dead_lettered",
            Self::DependencyChanged { .. } => "dependency_changed",
            Self::FallbackQueued { .. } => "fallback_queued",
            Self::NotificationSent { .. } => "notification_sent",
            Self::SweepCompleted { .. } => "sweep_completed",
            Self::HealthChanged { .. } => "health_changed",
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Monotonic identifier assigned to the wrapped event.
    pub id: EventId,
    /// Timestamp recording when the envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event payload.
    pub event: Event,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_are_uppercase() {
        assert_eq!(TaskStatus::Pending.as_str(), "PENDING");
        assert_eq!(TaskStatus::Downloaded.as_str(), "DOWNLOADED");
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Downloading.is_terminal());
    }

    #[test]
    fn event_kind_matches_payload() {
        let id = Uuid::nil();
        assert_eq!(
            Event::TaskCreated {
                task_id: id,
                file_name: "a.zip".into()
            }
            .kind(),
            "task_created"
        );
        assert_eq!(
            Event::StageStarted {
                task_id: id,
                stage: Stage::Extract
            }
            .kind(),
            "stage_started"
        );
        assert_eq!(
            Event::HealthChanged { degraded: vec![] }.kind(),
            "health_changed"
        );
    }
}
