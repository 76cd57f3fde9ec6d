use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sluice_engine::reconcile;
use sluice_events::EventBus;
use sluice_placement::{PlacementService, hash_file};
use sluice_tasks::{TaskStatus, TaskStore};
use sluice_telemetry::Metrics;
use sluice_test_support::{sample_archive_task, sample_text_task, staging_fixture};

const TEMP_AGE: Duration = Duration::from_secs(24 * 3_600);
const STAGE_AGE: Duration = Duration::from_secs(7 * 86_400);

async fn setup() -> Result<(sluice_test_support::StagingFixture, tempfile::TempDir, TaskStore, Arc<PlacementService>)>
{
    let fixture = staging_fixture()?;
    let db_dir = tempfile::tempdir()?;
    let store = TaskStore::open(&db_dir.path().join("sluice.db")).await?;
    let placement = Arc::new(PlacementService::new(
        fixture.paths.clone(),
        EventBus::new(),
        Metrics::new()?,
    ));
    Ok((fixture, db_dir, store, placement))
}

#[tokio::test]
async fn pending_task_with_temp_file_is_resumed() -> Result<()> {
    let (fixture, _db, store, placement) = setup().await?;

    let task = sample_text_task("h1", 64);
    store.create(&task).await?;
    let staged = fixture
        .paths
        .temp()
        .join(format!("{}_creds.txt", task.id));
    std::fs::write(&staged, vec![b'r'; 64])?;
    let (expected_hash, _) = hash_file(&staged)?;

    let summary = reconcile(&store, &placement, TEMP_AGE, STAGE_AGE).await?;
    assert_eq!(summary.resumed, 1);

    let resumed = store.by_id(task.id).await?.context("task missing")?;
    assert_eq!(resumed.status, TaskStatus::Downloaded);
    assert_eq!(resumed.staged_path.as_deref(), Some(staged.as_path()));
    assert_eq!(resumed.content_hash.as_deref(), Some(expected_hash.as_str()));
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn downloading_task_is_demoted_to_pending() -> Result<()> {
    let (_fixture, _db, store, placement) = setup().await?;

    let task = sample_text_task("h2", 64);
    store.create(&task).await?;
    store
        .transition(task.id, TaskStatus::Downloading, None, None)
        .await?;

    let summary = reconcile(&store, &placement, TEMP_AGE, STAGE_AGE).await?;
    assert_eq!(summary.demoted, 1);

    let demoted = store.by_id(task.id).await?.context("task missing")?;
    assert_eq!(demoted.status, TaskStatus::Pending);
    assert!(demoted.staged_path.is_none());
    assert!(demoted.content_hash.is_none());
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn downloading_task_with_complete_temp_file_is_repromoted() -> Result<()> {
    let (fixture, _db, store, placement) = setup().await?;

    let task = sample_text_task("h3", 64);
    store.create(&task).await?;
    store
        .transition(task.id, TaskStatus::Downloading, None, None)
        .await?;
    let staged = fixture
        .paths
        .temp()
        .join(format!("{}_creds.txt", task.id));
    std::fs::write(&staged, vec![b'c'; 64])?;

    let summary = reconcile(&store, &placement, TEMP_AGE, STAGE_AGE).await?;
    // Demoted first, then resumed by the temp-file probe in the same pass.
    assert_eq!(summary.demoted, 1);
    assert_eq!(summary.resumed, 1);

    let resumed = store.by_id(task.id).await?.context("task missing")?;
    assert_eq!(resumed.status, TaskStatus::Downloaded);
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn downloaded_task_with_intact_file_is_untouched() -> Result<()> {
    let (fixture, _db, store, placement) = setup().await?;

    let mut task = sample_text_task("h4", 64);
    let staged = fixture.paths.temp().join(format!("{}_creds.txt", task.id));
    std::fs::write(&staged, vec![b'i'; 64])?;
    task.status = TaskStatus::Downloaded;
    task.staged_path = Some(staged.clone());
    task.content_hash = Some("deadbeef".to_string());
    store.create(&task).await?;

    let summary = reconcile(&store, &placement, TEMP_AGE, STAGE_AGE).await?;
    assert_eq!(summary.resumed + summary.repaired + summary.refetched, 0);

    let untouched = store.by_id(task.id).await?.context("task missing")?;
    assert_eq!(untouched.status, TaskStatus::Downloaded);
    assert_eq!(untouched.staged_path.as_deref(), Some(staged.as_path()));
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn downloaded_task_found_in_stage_dir_is_repaired() -> Result<()> {
    let (fixture, _db, store, placement) = setup().await?;

    let mut task = sample_archive_task("h5", 64);
    task.status = TaskStatus::Downloaded;
    task.staged_path = Some(fixture.paths.temp().join("gone"));
    task.content_hash = Some("cafef00d".to_string());
    store.create(&task).await?;

    // The payload made it into the extract-input directory before the crash.
    let relocated = fixture.paths.files_all().join("a.zip");
    std::fs::write(&relocated, vec![b's'; 64])?;

    let summary = reconcile(&store, &placement, TEMP_AGE, STAGE_AGE).await?;
    assert_eq!(summary.repaired, 1);

    let repaired = store.by_id(task.id).await?.context("task missing")?;
    assert_eq!(repaired.status, TaskStatus::Downloaded);
    assert_eq!(repaired.staged_path.as_deref(), Some(relocated.as_path()));
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn downloaded_task_with_no_evidence_is_refetched() -> Result<()> {
    let (fixture, _db, store, placement) = setup().await?;

    let mut task = sample_archive_task("h6", 64);
    task.status = TaskStatus::Downloaded;
    task.staged_path = Some(fixture.paths.temp().join("vanished"));
    task.content_hash = Some("feedface".to_string());
    store.create(&task).await?;

    let summary = reconcile(&store, &placement, TEMP_AGE, STAGE_AGE).await?;
    assert_eq!(summary.refetched, 1);

    let refetched = store.by_id(task.id).await?.context("task missing")?;
    assert_eq!(refetched.status, TaskStatus::Pending);
    assert!(refetched.staged_path.is_none());
    assert!(refetched.content_hash.is_none());
    store.close().await;
    Ok(())
}

#[tokio::test]
async fn terminal_tasks_are_never_reclassified() -> Result<()> {
    let (_fixture, _db, store, placement) = setup().await?;

    let task = sample_text_task("h7", 64);
    store.create(&task).await?;
    store
        .transition(task.id, TaskStatus::Completed, None, None)
        .await?;

    let summary = reconcile(&store, &placement, TEMP_AGE, STAGE_AGE).await?;
    assert_eq!(
        summary.resumed + summary.demoted + summary.repaired + summary.refetched,
        0
    );

    let untouched = store.by_id(task.id).await?.context("task missing")?;
    assert_eq!(untouched.status, TaskStatus::Completed);
    store.close().await;
    Ok(())
}
