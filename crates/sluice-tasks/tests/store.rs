use std::future::Future;

use anyhow::{Context, Result};
use sluice_events::TaskStatus;
use sluice_tasks::{
    DeadLetterReason, ErrorCategory, NewAudit, NewDeadLetter, Task, TaskFault, TaskStore,
    TaskStoreError, TypeClass,
};
use uuid::Uuid;

async fn with_store<F, Fut>(test: F) -> Result<()>
where
    F: FnOnce(TaskStore) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let dir = tempfile::tempdir().context("failed to create temp dir")?;
    let store = TaskStore::open(&dir.path().join("sluice.db"))
        .await
        .context("failed to open task store")?;

    let result = test(store.clone()).await;
    store.close().await;
    result
}

fn sample_task() -> Task {
    Task::new(1_001, 1_001, "creds.txt", 1_048_576, TypeClass::Text, "h1")
}

#[tokio::test]
async fn create_and_read_round_trip() -> Result<()> {
    with_store(|store| async move {
        let task = sample_task();
        store.create(&task).await?;

        let loaded = store
            .by_id(task.id)
            .await?
            .context("task missing after insert")?;
        assert_eq!(loaded.id, task.id);
        assert_eq!(loaded.file_name, "creds.txt");
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.type_class, TypeClass::Text);
        assert!(loaded.staged_path.is_none());
        Ok(())
    })
    .await
}

#[tokio::test]
async fn duplicate_id_is_a_conflict() -> Result<()> {
    with_store(|store| async move {
        let task = sample_task();
        store.create(&task).await?;
        let err = store
            .create(&task)
            .await
            .expect_err("second insert with same id must fail");
        assert!(matches!(err, TaskStoreError::Conflict { .. }));
        Ok(())
    })
    .await
}

#[tokio::test]
async fn transition_stamps_terminal_timestamps() -> Result<()> {
    with_store(|store| async move {
        let task = sample_task();
        store.create(&task).await?;

        let moved = store
            .transition(task.id, TaskStatus::Downloading, None, Some(1))
            .await?;
        assert_eq!(moved.status, TaskStatus::Downloading);
        assert_eq!(moved.retry_count, 1);
        assert!(moved.completed_at.is_none());

        let fault = TaskFault::new(ErrorCategory::Network, "connection reset");
        let failed = store
            .transition(task.id, TaskStatus::Failed, Some(&fault), None)
            .await?;
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed.completed_at.is_some());
        let recorded = failed.fault.context("fault missing after failure")?;
        assert_eq!(recorded.category, ErrorCategory::Network);
        assert_eq!(recorded.message, "connection reset");
        Ok(())
    })
    .await
}

#[tokio::test]
async fn transition_on_missing_row_is_gone() -> Result<()> {
    with_store(|store| async move {
        let err = store
            .transition(Uuid::new_v4(), TaskStatus::Downloaded, None, None)
            .await
            .expect_err("missing row must surface Gone");
        assert!(matches!(err, TaskStoreError::Gone { .. }));
        Ok(())
    })
    .await
}

#[tokio::test]
async fn retry_count_never_decreases() -> Result<()> {
    with_store(|store| async move {
        let task = sample_task();
        store.create(&task).await?;

        store
            .transition(task.id, TaskStatus::Downloading, None, Some(3))
            .await?;
        let demoted = store
            .transition(task.id, TaskStatus::Pending, None, Some(1))
            .await?;
        assert_eq!(demoted.retry_count, 3);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn pending_returns_oldest_first() -> Result<()> {
    with_store(|store| async move {
        let mut first = sample_task();
        first.created_at = first.created_at - chrono::Duration::seconds(60);
        let second = sample_task();
        store.create(&second).await?;
        store.create(&first).await?;

        let batch = store.pending(10).await?;
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, first.id);
        assert_eq!(batch[1].id, second.id);

        let limited = store.pending(1).await?;
        assert_eq!(limited.len(), 1);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn live_hash_uniqueness_is_enforced() -> Result<()> {
    with_store(|store| async move {
        let mut winner = sample_task();
        winner.content_hash = Some("abc123".to_string());
        winner.status = TaskStatus::Downloaded;
        winner.staged_path = Some("/tmp/one".into());
        store.create(&winner).await?;

        let mut loser = Task::new(2, 2, "other.txt", 10, TypeClass::Text, "h2");
        store.create(&loser).await?;
        loser.content_hash = Some("abc123".to_string());
        let err = store
            .update(&loser)
            .await
            .expect_err("second live task with same hash must conflict");
        assert!(matches!(err, TaskStoreError::Conflict { .. }));

        // A FAILED task may carry the same hash.
        loser.status = TaskStatus::Failed;
        loser.completed_at = Some(chrono::Utc::now());
        loser.fault = Some(TaskFault::duplicate_of(winner.id));
        store.update(&loser).await?;

        let found = store
            .by_hash("abc123")
            .await?
            .context("live hash lookup came back empty")?;
        assert_eq!(found.id, winner.id);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn completed_unnotified_and_mark_notified() -> Result<()> {
    with_store(|store| async move {
        let task = sample_task();
        store.create(&task).await?;
        store
            .transition(task.id, TaskStatus::Completed, None, None)
            .await?;

        let waiting = store.completed_unnotified().await?;
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].id, task.id);

        store.mark_notified(task.id).await?;
        store.mark_notified(task.id).await?; // idempotent
        assert!(store.completed_unnotified().await?.is_empty());
        Ok(())
    })
    .await
}

#[tokio::test]
async fn counts_by_status_groups_rows() -> Result<()> {
    with_store(|store| async move {
        store.create(&sample_task()).await?;
        let other = Task::new(2, 2, "a.zip", 20, TypeClass::Archive, "h9");
        store.create(&other).await?;
        store
            .transition(other.id, TaskStatus::Completed, None, None)
            .await?;

        let counts = store.counts_by_status().await?;
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.total(), 2);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn audit_trail_is_appended_and_readable() -> Result<()> {
    with_store(|store| async move {
        let task = sample_task();
        store.create(&task).await?;
        store
            .record_audit(&NewAudit::transition(
                task.id,
                TaskStatus::Pending,
                TaskStatus::Downloading,
                "picked up by download worker".to_string(),
            ))
            .await?;
        store
            .record_audit(&NewAudit::milestone(
                task.id,
                "hash_computed",
                "sha256 complete".to_string(),
            ))
            .await?;

        let entries = store.recent_audit(10).await?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "hash_computed");
        assert_eq!(entries[1].action, "transition");
        assert_eq!(entries[1].old_status, Some(TaskStatus::Pending));
        assert_eq!(entries[1].new_status, Some(TaskStatus::Downloading));
        Ok(())
    })
    .await
}

#[tokio::test]
async fn dead_letters_capture_snapshot() -> Result<()> {
    with_store(|store| async move {
        let task = sample_task();
        store.create(&task).await?;
        let fault = TaskFault::new(ErrorCategory::ExternalProcess, "exit status 2");
        let letter = NewDeadLetter::capture(
            &task,
            DeadLetterReason::MaxRetries,
            fault,
            Some(serde_json::json!({ "attempts": 3 })),
        );
        store.push_dead_letter(&letter).await?;

        let letters = store.dead_letters(5).await?;
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].task_id, task.id);
        assert_eq!(letters[0].reason, DeadLetterReason::MaxRetries);
        assert!(letters[0].can_retry);
        assert!(!letters[0].requires_manual);
        let context = letters[0].context.as_ref().context("context missing")?;
        assert_eq!(context["attempts"], 3);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn migrations_reapply_cleanly() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sluice.db");

    let store = TaskStore::open(&path).await?;
    store.create(&sample_task()).await?;
    store.close().await;

    // Re-opening runs the migrator again; already applied steps are no-ops.
    let reopened = TaskStore::open(&path).await?;
    assert_eq!(reopened.counts_by_status().await?.total(), 1);
    reopened.close().await;
    Ok(())
}
