//! SQLite-backed repository for task, audit, and dead-letter records.
//!
//! # Design
//! - Single source of truth: all persisted mutable state flows through the
//!   named operations here; callers get value copies, never shared rows.
//! - One transaction per operation; a storage fault from `transition` never
//!   advances status, so the caller can treat the attempt as unhappened.
//! - WAL journal mode with a small pool: readers never block the writer for
//!   more than one write burst.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use sluice_events::TaskStatus;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::warn;
use uuid::Uuid;

use crate::error::{TaskStoreError, TaskStoreResult};
use crate::fault::{ErrorCategory, ErrorSeverity, TaskFault};
use crate::model::{AuditRecord, DeadLetter, NewAudit, NewDeadLetter, StatusCounts, Task, TypeClass};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONNECTIONS: u32 = 4;

const INSERT_TASK: &str = r"
    INSERT INTO tasks (
        id, owner_id, channel_id, file_name, file_size, file_type, file_hash,
        uplink_handle, staged_path, status, error_message, error_category,
        error_severity, retry_count, notified, created_at, updated_at,
        completed_at
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
";

const SELECT_TASK: &str = "SELECT * FROM tasks WHERE id = ?1";

const SELECT_PENDING: &str = r"
    SELECT * FROM tasks WHERE status = 'PENDING' ORDER BY created_at ASC LIMIT ?1
";

const SELECT_BY_STATUS: &str = r"
    SELECT * FROM tasks WHERE status = ?1 ORDER BY created_at ASC
";

const SELECT_BY_HASH: &str = r"
    SELECT * FROM tasks
    WHERE file_hash = ?1 AND status != 'FAILED'
    ORDER BY created_at ASC
    LIMIT 1
";

const UPDATE_TRANSITION: &str = r"
    UPDATE tasks SET
        status = ?2,
        updated_at = ?3,
        completed_at = CASE WHEN ?4 THEN ?3 ELSE completed_at END,
        retry_count = CASE WHEN ?5 IS NULL THEN retry_count ELSE MAX(retry_count, ?5) END,
        error_message = COALESCE(?6, error_message),
        error_category = COALESCE(?7, error_category),
        error_severity = COALESCE(?8, error_severity)
    WHERE id = ?1
";

const UPDATE_TASK: &str = r"
    UPDATE tasks SET
        owner_id = ?2, channel_id = ?3, file_name = ?4, file_size = ?5,
        file_type = ?6, file_hash = ?7, uplink_handle = ?8, staged_path = ?9,
        status = ?10, error_message = ?11, error_category = ?12,
        error_severity = ?13, retry_count = ?14, notified = ?15,
        updated_at = ?16, completed_at = ?17
    WHERE id = ?1
";

const SELECT_COMPLETED_UNNOTIFIED: &str = r"
    SELECT * FROM tasks
    WHERE status = 'COMPLETED' AND notified = 0
    ORDER BY completed_at ASC
";

const UPDATE_NOTIFIED: &str = r"
    UPDATE tasks SET notified = 1, updated_at = ?2 WHERE id = ?1
";

const SELECT_COUNTS: &str = "SELECT status, COUNT(*) AS n FROM tasks GROUP BY status";

const INSERT_AUDIT: &str = r"
    INSERT INTO audit_log (task_id, actor_id, action, old_status, new_status, detail, created_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
";

const SELECT_AUDIT: &str = r"
    SELECT id, task_id, actor_id, action, old_status, new_status, detail, created_at
    FROM audit_log ORDER BY id DESC LIMIT ?1
";

const INSERT_DEAD_LETTER: &str = r"
    INSERT INTO dead_letters (
        task_id, owner_id, channel_id, file_name, file_type, file_hash,
        reason, can_retry, requires_manual, error_message, error_category,
        error_severity, context, created_at
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
";

const SELECT_DEAD_LETTERS: &str = r"
    SELECT * FROM dead_letters ORDER BY id DESC LIMIT ?1
";

/// Database-backed repository for pipeline state.
#[derive(Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    /// Open (creating if missing) the store at `path` and apply pending
    /// migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or a migration
    /// fails. Re-applying an already applied migration after a crash is a
    /// no-op.
    pub async fn open(path: &Path) -> TaskStoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|source| TaskStoreError::storage("store.open", source))?;

        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator
            .run(&pool)
            .await
            .map_err(|source| TaskStoreError::Migrate { source })?;

        Ok(Self { pool })
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a freshly admitted task.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if a row with the same id already exists, or
    /// `Storage` on engine failure.
    pub async fn create(&self, task: &Task) -> TaskStoreResult<()> {
        let fault = task.fault.as_ref();
        sqlx::query(INSERT_TASK)
            .bind(task.id.to_string())
            .bind(task.owner_id)
            .bind(task.channel_id)
            .bind(&task.file_name)
            .bind(task.file_size)
            .bind(task.type_class.as_str())
            .bind(task.content_hash.as_deref())
            .bind(&task.uplink_handle)
            .bind(encode_path(task.staged_path.as_deref())?)
            .bind(task.status.as_str())
            .bind(fault.map(|f| f.message.as_str()))
            .bind(fault.map(|f| f.category.as_str()))
            .bind(fault.map(|f| f.severity.as_str()))
            .bind(task.retry_count)
            .bind(task.notified)
            .bind(task.created_at)
            .bind(task.updated_at)
            .bind(task.completed_at)
            .execute(&self.pool)
            .await
            .map_err(|err| classify_write_error("store.create", task.id, err))?;
        Ok(())
    }

    /// Fetch a task by id.
    ///
    /// # Errors
    ///
    /// Returns `Storage` on engine failure or `Corrupt` if the row cannot be
    /// decoded.
    pub async fn by_id(&self, id: Uuid) -> TaskStoreResult<Option<Task>> {
        let row = sqlx::query(SELECT_TASK)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|source| TaskStoreError::storage("store.by_id", source))?;
        row.map(|row| decode_task(&row)).transpose()
    }

    /// Oldest-first batch of tasks awaiting a download worker.
    ///
    /// # Errors
    ///
    /// Returns `Storage` on engine failure or `Corrupt` on a bad row.
    pub async fn pending(&self, limit: i64) -> TaskStoreResult<Vec<Task>> {
        let rows = sqlx::query(SELECT_PENDING)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|source| TaskStoreError::storage("store.pending", source))?;
        rows.iter().map(decode_task).collect()
    }

    /// Oldest-first list of tasks with the given status.
    ///
    /// # Errors
    ///
    /// Returns `Storage` on engine failure or `Corrupt` on a bad row.
    pub async fn by_status(&self, status: TaskStatus) -> TaskStoreResult<Vec<Task>> {
        let rows = sqlx::query(SELECT_BY_STATUS)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|source| TaskStoreError::storage("store.by_status", source))?;
        rows.iter().map(decode_task).collect()
    }

    /// First non-failed task carrying the given content hash, if any.
    ///
    /// # Errors
    ///
    /// Returns `Storage` on engine failure or `Corrupt` on a bad row.
    pub async fn by_hash(&self, hash: &str) -> TaskStoreResult<Option<Task>> {
        let row = sqlx::query(SELECT_BY_HASH)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|source| TaskStoreError::storage("store.by_hash", source))?;
        row.map(|row| decode_task(&row)).transpose()
    }

    /// Commit a status transition, stamping `updated_at` and, for terminal
    /// statuses, `completed_at`. `retry_count` only ever moves forward.
    ///
    /// # Errors
    ///
    /// Returns `Gone` if the task does not exist or `Storage` on engine
    /// failure; in the latter case the status has not advanced.
    pub async fn transition(
        &self,
        id: Uuid,
        status: TaskStatus,
        fault: Option<&TaskFault>,
        retry_count: Option<i64>,
    ) -> TaskStoreResult<Task> {
        let now = Utc::now();
        let result = sqlx::query(UPDATE_TRANSITION)
            .bind(id.to_string())
            .bind(status.as_str())
            .bind(now)
            .bind(status.is_terminal())
            .bind(retry_count)
            .bind(fault.map(|f| f.message.as_str()))
            .bind(fault.map(|f| f.category.as_str()))
            .bind(fault.map(|f| f.severity.as_str()))
            .execute(&self.pool)
            .await
            .map_err(|source| TaskStoreError::storage("store.transition", source))?;

        if result.rows_affected() == 0 {
            return Err(TaskStoreError::gone("store.transition", id));
        }

        self.by_id(id)
            .await?
            .ok_or(TaskStoreError::gone("store.transition", id))
    }

    /// Whole-row update preserving `id` and `created_at`; stamps
    /// `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns `Gone` if the task does not exist, `Conflict` if the write
    /// collides with a live content hash, or `Storage` on engine failure.
    pub async fn update(&self, task: &Task) -> TaskStoreResult<()> {
        let fault = task.fault.as_ref();
        let result = sqlx::query(UPDATE_TASK)
            .bind(task.id.to_string())
            .bind(task.owner_id)
            .bind(task.channel_id)
            .bind(&task.file_name)
            .bind(task.file_size)
            .bind(task.type_class.as_str())
            .bind(task.content_hash.as_deref())
            .bind(&task.uplink_handle)
            .bind(encode_path(task.staged_path.as_deref())?)
            .bind(task.status.as_str())
            .bind(fault.map(|f| f.message.as_str()))
            .bind(fault.map(|f| f.category.as_str()))
            .bind(fault.map(|f| f.severity.as_str()))
            .bind(task.retry_count)
            .bind(task.notified)
            .bind(Utc::now())
            .bind(task.completed_at)
            .execute(&self.pool)
            .await
            .map_err(|err| classify_write_error("store.update", task.id, err))?;

        if result.rows_affected() == 0 {
            return Err(TaskStoreError::gone("store.update", task.id));
        }
        Ok(())
    }

    /// Oldest-first list of completed tasks whose notice has not gone out.
    ///
    /// # Errors
    ///
    /// Returns `Storage` on engine failure or `Corrupt` on a bad row.
    pub async fn completed_unnotified(&self) -> TaskStoreResult<Vec<Task>> {
        let rows = sqlx::query(SELECT_COMPLETED_UNNOTIFIED)
            .fetch_all(&self.pool)
            .await
            .map_err(|source| TaskStoreError::storage("store.completed_unnotified", source))?;
        rows.iter().map(decode_task).collect()
    }

    /// Flip the `notified` flag. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `Gone` if the task does not exist or `Storage` on engine
    /// failure.
    pub async fn mark_notified(&self, id: Uuid) -> TaskStoreResult<()> {
        let result = sqlx::query(UPDATE_NOTIFIED)
            .bind(id.to_string())
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|source| TaskStoreError::storage("store.mark_notified", source))?;
        if result.rows_affected() == 0 {
            return Err(TaskStoreError::gone("store.mark_notified", id));
        }
        Ok(())
    }

    /// Aggregate task counts per status.
    ///
    /// # Errors
    ///
    /// Returns `Storage` on engine failure.
    pub async fn counts_by_status(&self) -> TaskStoreResult<StatusCounts> {
        let rows = sqlx::query(SELECT_COUNTS)
            .fetch_all(&self.pool)
            .await
            .map_err(|source| TaskStoreError::storage("store.counts_by_status", source))?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let label: String = row
                .try_get("status")
                .map_err(|source| TaskStoreError::storage("store.counts_by_status", source))?;
            let count: i64 = row
                .try_get("n")
                .map_err(|source| TaskStoreError::storage("store.counts_by_status", source))?;
            match status_from_label(&label) {
                Some(status) => counts.set(status, count),
                None => {
                    warn!(status = %label, "unknown task status encountered in counts");
                }
            }
        }
        Ok(counts)
    }

    /// Append an audit entry.
    ///
    /// # Errors
    ///
    /// Returns `Storage` on engine failure.
    pub async fn record_audit(&self, entry: &NewAudit) -> TaskStoreResult<()> {
        sqlx::query(INSERT_AUDIT)
            .bind(entry.task_id.map(|id| id.to_string()))
            .bind(entry.actor_id)
            .bind(entry.action)
            .bind(entry.old_status.map(TaskStatus::as_str))
            .bind(entry.new_status.map(TaskStatus::as_str))
            .bind(&entry.detail)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|source| TaskStoreError::storage("store.record_audit", source))?;
        Ok(())
    }

    /// Newest-first slice of the audit trail.
    ///
    /// # Errors
    ///
    /// Returns `Storage` on engine failure or `Corrupt` on a bad row.
    pub async fn recent_audit(&self, limit: i64) -> TaskStoreResult<Vec<AuditRecord>> {
        let rows = sqlx::query(SELECT_AUDIT)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|source| TaskStoreError::storage("store.recent_audit", source))?;
        rows.iter().map(decode_audit).collect()
    }

    /// Capture a dead-letter record.
    ///
    /// # Errors
    ///
    /// Returns `Storage` on engine failure.
    pub async fn push_dead_letter(&self, letter: &NewDeadLetter) -> TaskStoreResult<()> {
        let context = letter
            .context
            .as_ref()
            .map(serde_json::Value::to_string);
        sqlx::query(INSERT_DEAD_LETTER)
            .bind(letter.task_id.to_string())
            .bind(letter.owner_id)
            .bind(letter.channel_id)
            .bind(&letter.file_name)
            .bind(letter.file_type.as_str())
            .bind(letter.file_hash.as_deref())
            .bind(letter.reason.as_str())
            .bind(letter.reason.can_retry())
            .bind(letter.reason.requires_manual())
            .bind(&letter.fault.message)
            .bind(letter.fault.category.as_str())
            .bind(letter.fault.severity.as_str())
            .bind(context)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|source| TaskStoreError::storage("store.push_dead_letter", source))?;
        Ok(())
    }

    /// Newest-first slice of the dead-letter table.
    ///
    /// # Errors
    ///
    /// Returns `Storage` on engine failure or `Corrupt` on a bad row.
    pub async fn dead_letters(&self, limit: i64) -> TaskStoreResult<Vec<DeadLetter>> {
        let rows = sqlx::query(SELECT_DEAD_LETTERS)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|source| TaskStoreError::storage("store.dead_letters", source))?;
        rows.iter().map(decode_dead_letter).collect()
    }

    /// Close the pool, flushing the WAL. Called last during shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn classify_write_error(operation: &'static str, task_id: Uuid, err: sqlx::Error) -> TaskStoreError {
    let unique = err
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation());
    if unique {
        TaskStoreError::conflict(operation, task_id)
    } else {
        TaskStoreError::storage(operation, err)
    }
}

fn encode_path(path: Option<&Path>) -> TaskStoreResult<Option<String>> {
    match path {
        None => Ok(None),
        Some(path) => path.to_str().map_or_else(
            || {
                Err(TaskStoreError::corrupt(
                    "staged_path",
                    path.to_string_lossy().into_owned(),
                ))
            },
            |text| Ok(Some(text.to_string())),
        ),
    }
}

fn status_from_label(label: &str) -> Option<TaskStatus> {
    match label {
        "PENDING" => Some(TaskStatus::Pending),
        "DOWNLOADING" => Some(TaskStatus::Downloading),
        "DOWNLOADED" => Some(TaskStatus::Downloaded),
        "COMPLETED" => Some(TaskStatus::Completed),
        "FAILED" => Some(TaskStatus::Failed),
        _ => None,
    }
}

fn get_column<'a, T>(row: &'a SqliteRow, column: &'static str) -> TaskStoreResult<T>
where
    T: sqlx::Decode<'a, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column)
        .map_err(|_| TaskStoreError::corrupt(column, "<undecodable>"))
}

fn decode_task(row: &SqliteRow) -> TaskStoreResult<Task> {
    let id_text: String = get_column(row, "id")?;
    let id = Uuid::parse_str(&id_text)
        .map_err(|_| TaskStoreError::corrupt("id", id_text.clone()))?;

    let status_label: String = get_column(row, "status")?;
    let status = status_from_label(&status_label)
        .ok_or_else(|| TaskStoreError::corrupt("status", status_label.clone()))?;

    let type_label: String = get_column(row, "file_type")?;
    let type_class = TypeClass::parse(&type_label)
        .ok_or_else(|| TaskStoreError::corrupt("file_type", type_label.clone()))?;

    let fault = decode_fault(row)?;
    let staged_path: Option<String> = get_column(row, "staged_path")?;

    Ok(Task {
        id,
        owner_id: get_column(row, "owner_id")?,
        channel_id: get_column(row, "channel_id")?,
        file_name: get_column(row, "file_name")?,
        file_size: get_column(row, "file_size")?,
        type_class,
        uplink_handle: get_column(row, "uplink_handle")?,
        content_hash: get_column(row, "file_hash")?,
        staged_path: staged_path.map(std::path::PathBuf::from),
        status,
        fault,
        retry_count: get_column(row, "retry_count")?,
        notified: get_column(row, "notified")?,
        created_at: get_column(row, "created_at")?,
        updated_at: get_column(row, "updated_at")?,
        completed_at: get_column(row, "completed_at")?,
    })
}

fn decode_fault(row: &SqliteRow) -> TaskStoreResult<Option<TaskFault>> {
    let message: Option<String> = get_column(row, "error_message")?;
    let category_label: Option<String> = get_column(row, "error_category")?;
    let severity_label: Option<String> = get_column(row, "error_severity")?;

    let (Some(message), Some(category_label)) = (message, category_label) else {
        return Ok(None);
    };

    let category = ErrorCategory::parse(&category_label)
        .ok_or_else(|| TaskStoreError::corrupt("error_category", category_label.clone()))?;
    let severity = severity_label
        .as_deref()
        .and_then(ErrorSeverity::parse)
        .unwrap_or_else(|| category.default_severity());

    Ok(Some(TaskFault {
        category,
        severity,
        message,
    }))
}

fn decode_audit(row: &SqliteRow) -> TaskStoreResult<AuditRecord> {
    let task_id: Option<String> = get_column(row, "task_id")?;
    let task_id = task_id
        .map(|text| Uuid::parse_str(&text).map_err(|_| TaskStoreError::corrupt("task_id", text)))
        .transpose()?;

    let old_status: Option<String> = get_column(row, "old_status")?;
    let new_status: Option<String> = get_column(row, "new_status")?;

    Ok(AuditRecord {
        id: get_column(row, "id")?,
        task_id,
        actor_id: get_column(row, "actor_id")?,
        action: get_column(row, "action")?,
        old_status: old_status.as_deref().and_then(status_from_label),
        new_status: new_status.as_deref().and_then(status_from_label),
        detail: get_column(row, "detail")?,
        created_at: get_column(row, "created_at")?,
    })
}

fn decode_dead_letter(row: &SqliteRow) -> TaskStoreResult<DeadLetter> {
    let task_text: String = get_column(row, "task_id")?;
    let task_id = Uuid::parse_str(&task_text)
        .map_err(|_| TaskStoreError::corrupt("task_id", task_text.clone()))?;

    let type_label: String = get_column(row, "file_type")?;
    let file_type = TypeClass::parse(&type_label)
        .ok_or_else(|| TaskStoreError::corrupt("file_type", type_label.clone()))?;

    let reason_label: String = get_column(row, "reason")?;
    let reason = dead_letter_reason_from_label(&reason_label)
        .ok_or_else(|| TaskStoreError::corrupt("reason", reason_label.clone()))?;

    let category_label: String = get_column(row, "error_category")?;
    let category = ErrorCategory::parse(&category_label)
        .ok_or_else(|| TaskStoreError::corrupt("error_category", category_label.clone()))?;
    let severity_label: String = get_column(row, "error_severity")?;
    let severity = ErrorSeverity::parse(&severity_label)
        .ok_or_else(|| TaskStoreError::corrupt("error_severity", severity_label.clone()))?;

    let context_text: Option<String> = get_column(row, "context")?;
    let context = context_text
        .map(|text| {
            serde_json::from_str(&text).map_err(|_| TaskStoreError::corrupt("context", text))
        })
        .transpose()?;

    Ok(DeadLetter {
        id: get_column(row, "id")?,
        task_id,
        owner_id: get_column(row, "owner_id")?,
        channel_id: get_column(row, "channel_id")?,
        file_name: get_column(row, "file_name")?,
        file_type,
        file_hash: get_column(row, "file_hash")?,
        reason,
        can_retry: get_column(row, "can_retry")?,
        requires_manual: get_column(row, "requires_manual")?,
        fault: TaskFault {
            category,
            severity,
            message: get_column(row, "error_message")?,
        },
        context,
        created_at: get_column(row, "created_at")?,
    })
}

fn dead_letter_reason_from_label(label: &str) -> Option<crate::fault::DeadLetterReason> {
    use crate::fault::DeadLetterReason as R;
    match label {
        "max_retries" => Some(R::MaxRetries),
        "non_retryable" => Some(R::NonRetryable),
        "critical" => Some(R::Critical),
        "manual_move" => Some(R::ManualMove),
        "system" => Some(R::System),
        "timeout" => Some(R::Timeout),
        "corruption" => Some(R::Corruption),
        _ => None,
    }
}
