//! Classified fault taxonomy: error categories, severities, and the
//! dead-letter reasons derived from them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Categories that decide retry strategy and submitter visibility.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Transient network failure while talking to the uplink.
    Network,
    /// Transient filesystem failure (`EBUSY`, short I/O).
    FilesystemTransient,
    /// Hard filesystem failure (permission denied, disk full).
    FilesystemHard,
    /// Authorization failure (owner not on the allow list).
    Permission,
    /// Transient storage-engine failure (database locked).
    Store,
    /// Payload rejected by admission policy (name, size, duplicate digest).
    Validation,
    /// External tool exited non-zero or produced unusable output.
    ExternalProcess,
    /// Uplink API rate limit hit.
    RateLimit,
    /// System resource exhaustion (file handles, memory).
    Resource,
    /// Unclassified failure that requires an operator.
    Critical,
}

impl ErrorCategory {
    /// Label persisted in the `error_category` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::FilesystemTransient => "filesystem_transient",
            Self::FilesystemHard => "filesystem_hard",
            Self::Permission => "permission",
            Self::Store => "store",
            Self::Validation => "validation",
            Self::ExternalProcess => "external_process",
            Self::RateLimit => "rate_limit",
            Self::Resource => "resource",
            Self::Critical => "critical",
        }
    }

    /// Parse a persisted label back into a category.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "network" => Some(Self::Network),
            "filesystem_transient" => Some(Self::FilesystemTransient),
            "filesystem_hard" => Some(Self::FilesystemHard),
            "permission" => Some(Self::Permission),
            "store" => Some(Self::Store),
            "validation" => Some(Self::Validation),
            "external_process" => Some(Self::ExternalProcess),
            "rate_limit" => Some(Self::RateLimit),
            "resource" => Some(Self::Resource),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Whether the retry service will ever re-attempt this category.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(
            self,
            Self::FilesystemHard | Self::Permission | Self::Validation | Self::Critical
        )
    }

    /// Severity assigned when the producer does not override it.
    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network
            | Self::FilesystemTransient
            | Self::Store
            | Self::ExternalProcess => ErrorSeverity::Medium,
            Self::FilesystemHard | Self::Permission | Self::Resource => ErrorSeverity::High,
            Self::Validation | Self::RateLimit => ErrorSeverity::Low,
            Self::Critical => ErrorSeverity::Critical,
        }
    }

    /// Whether terminal failures of this category are shown to the submitter.
    #[must_use]
    pub const fn submitter_visible(self) -> bool {
        !matches!(self, Self::Store | Self::RateLimit)
    }
}

/// Operator-facing severity scale.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Expected rejection; no operator action.
    Low,
    /// Transient fault; retried automatically.
    Medium,
    /// Persistent fault; likely needs an operator.
    High,
    /// Unclassified fault; always needs an operator.
    Critical,
}

impl ErrorSeverity {
    /// Label persisted in the `error_severity` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Parse a persisted label back into a severity.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Classified fault recorded on a task when it transitions into `FAILED`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskFault {
    /// Category deciding retry strategy and visibility.
    pub category: ErrorCategory,
    /// Operator-facing severity.
    pub severity: ErrorSeverity,
    /// Human-readable detail; never shown raw to submitters.
    pub message: String,
}

impl TaskFault {
    /// Build a fault with the category's default severity.
    #[must_use]
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            severity: category.default_severity(),
            message: message.into(),
        }
    }

    /// Build a fault with an explicit severity override.
    #[must_use]
    pub fn with_severity(
        category: ErrorCategory,
        severity: ErrorSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            severity,
            message: message.into(),
        }
    }

    /// Fault recorded on the losing side of a content-hash collision.
    #[must_use]
    pub fn duplicate_of(winner: Uuid) -> Self {
        Self::new(ErrorCategory::Validation, format!("duplicate of {winner}"))
    }

    /// Compact single-line reason suitable for submitter-facing notices.
    #[must_use]
    pub const fn submitter_reason(&self) -> &'static str {
        match self.category {
            ErrorCategory::Network => "the transfer could not be completed",
            ErrorCategory::FilesystemTransient | ErrorCategory::FilesystemHard => {
                "the file could not be stored"
            }
            ErrorCategory::Permission => "you are not authorised to submit files",
            ErrorCategory::Store | ErrorCategory::RateLimit => "processing was interrupted",
            ErrorCategory::Validation => "the file was rejected by policy",
            ErrorCategory::ExternalProcess => "the file could not be processed",
            ErrorCategory::Resource => "the system is out of resources",
            ErrorCategory::Critical => "an internal error occurred; an operator was notified",
        }
    }
}

/// Reasons a task is removed from the main queue into the dead-letter table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// The retry budget was exhausted.
    MaxRetries,
    /// The fault category never retries.
    NonRetryable,
    /// Unclassified failure (panic, invariant breach).
    Critical,
    /// An operator moved the task out manually.
    ManualMove,
    /// System-level fault (resource exhaustion).
    System,
    /// A per-task deadline fired.
    Timeout,
    /// The payload or the tool output was corrupt.
    Corruption,
}

impl DeadLetterReason {
    /// Label persisted in the `reason` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MaxRetries => "max_retries",
            Self::NonRetryable => "non_retryable",
            Self::Critical => "critical",
            Self::ManualMove => "manual_move",
            Self::System => "system",
            Self::Timeout => "timeout",
            Self::Corruption => "corruption",
        }
    }

    /// Derive the reason from a terminal fault.
    ///
    /// `timed_out` marks faults produced by a per-task deadline; `exhausted`
    /// marks faults that burned the whole retry budget.
    #[must_use]
    pub const fn classify(fault: &TaskFault, exhausted: bool, timed_out: bool) -> Self {
        if timed_out {
            return Self::Timeout;
        }
        match fault.category {
            ErrorCategory::Critical => Self::Critical,
            ErrorCategory::Resource => Self::System,
            _ => {
                if fault.category.is_retryable() {
                    if exhausted {
                        Self::MaxRetries
                    } else {
                        Self::NonRetryable
                    }
                } else {
                    Self::NonRetryable
                }
            }
        }
    }

    /// Whether an operator may re-inject the task.
    #[must_use]
    pub const fn can_retry(self) -> bool {
        matches!(self, Self::MaxRetries | Self::System | Self::Timeout)
    }

    /// Whether the record needs manual attention before anything else.
    #[must_use]
    pub const fn requires_manual(self) -> bool {
        matches!(self, Self::Critical | Self::ManualMove | Self::Corruption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_labels_round_trip() {
        for category in [
            ErrorCategory::Network,
            ErrorCategory::FilesystemTransient,
            ErrorCategory::FilesystemHard,
            ErrorCategory::Permission,
            ErrorCategory::Store,
            ErrorCategory::Validation,
            ErrorCategory::ExternalProcess,
            ErrorCategory::RateLimit,
            ErrorCategory::Resource,
            ErrorCategory::Critical,
        ] {
            assert_eq!(ErrorCategory::parse(category.as_str()), Some(category));
        }
        assert_eq!(ErrorCategory::parse("bogus"), None);
    }

    #[test]
    fn non_retryable_categories_short_circuit() {
        assert!(!ErrorCategory::Validation.is_retryable());
        assert!(!ErrorCategory::Permission.is_retryable());
        assert!(!ErrorCategory::FilesystemHard.is_retryable());
        assert!(!ErrorCategory::Critical.is_retryable());
        assert!(ErrorCategory::Network.is_retryable());
        assert!(ErrorCategory::Store.is_retryable());
    }

    #[test]
    fn duplicate_fault_points_at_winner() {
        let winner = Uuid::new_v4();
        let fault = TaskFault::duplicate_of(winner);
        assert_eq!(fault.category, ErrorCategory::Validation);
        assert!(fault.message.starts_with("duplicate of "));
        assert!(fault.message.contains(&winner.to_string()));
    }

    #[test]
    fn dead_letter_classification_follows_fault() {
        let timeout = TaskFault::new(ErrorCategory::ExternalProcess, "deadline");
        assert_eq!(
            DeadLetterReason::classify(&timeout, true, true),
            DeadLetterReason::Timeout
        );

        let network = TaskFault::new(ErrorCategory::Network, "reset");
        assert_eq!(
            DeadLetterReason::classify(&network, true, false),
            DeadLetterReason::MaxRetries
        );

        let validation = TaskFault::new(ErrorCategory::Validation, "rejected");
        assert_eq!(
            DeadLetterReason::classify(&validation, false, false),
            DeadLetterReason::NonRetryable
        );

        let panic = TaskFault::new(ErrorCategory::Critical, "invariant");
        assert_eq!(
            DeadLetterReason::classify(&panic, false, false),
            DeadLetterReason::Critical
        );
        assert!(DeadLetterReason::Critical.requires_manual());
        assert!(DeadLetterReason::MaxRetries.can_retry());
    }
}
