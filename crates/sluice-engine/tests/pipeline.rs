use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use sluice_config::{NotifyPolicy, PipelinePolicy};
use sluice_engine::{
    Coordinator, DEP_CONVERTER, DEP_EXTRACTOR, DependencyKind, DependencyMonitor, DependencySpec,
    FallbackMode, NewTaskRequest, PipelineContext,
};
use sluice_events::EventBus;
use sluice_placement::{NamePolicy, PlacementService};
use sluice_stage::CircuitBreaker;
use sluice_tasks::{ErrorCategory, ErrorSeverity, Task, TaskStatus, TaskStore, TypeClass};
use sluice_telemetry::Metrics;
use sluice_test_support::{
    ExtractBehaviour, FakeConverter, FakeExtractor, RecordingUplink, StagingFixture,
    staging_fixture,
};
use tempfile::TempDir;
use tokio::time::sleep;
use uuid::Uuid;

struct Harness {
    fixture: StagingFixture,
    _db_dir: TempDir,
    store: TaskStore,
    coordinator: Coordinator,
    uplink: Arc<RecordingUplink>,
    extractor: Arc<FakeExtractor>,
    _converter: Arc<FakeConverter>,
}

/// Dependencies registered against always-present directories so probes
/// succeed unless a test overrides them.
async fn harness(behaviour: ExtractBehaviour) -> Result<Harness> {
    harness_with(behaviour, Vec::new(), |_fixture, monitor| {
        monitor.register(always_available(DEP_EXTRACTOR));
        monitor.register(always_available(DEP_CONVERTER));
    })
    .await
}

fn always_available(name: &str) -> DependencySpec {
    DependencySpec {
        name: name.to_string(),
        kind: DependencyKind::Directory,
        path: std::env::temp_dir(),
        probe_interval: Duration::from_millis(100),
        fallback: FallbackMode::Queue,
    }
}

async fn harness_with<F>(
    behaviour: ExtractBehaviour,
    allowed_owners: Vec<i64>,
    register: F,
) -> Result<Harness>
where
    F: FnOnce(&StagingFixture, &DependencyMonitor),
{
    let fixture = staging_fixture()?;
    let db_dir = tempfile::tempdir()?;
    let store = TaskStore::open(&db_dir.path().join("sluice.db")).await?;

    let events = EventBus::new();
    let metrics = Metrics::new()?;
    let placement = Arc::new(PlacementService::new(
        fixture.paths.clone(),
        events.clone(),
        metrics.clone(),
    ));
    let uplink = Arc::new(RecordingUplink::new(
        fixture.paths.documents().to_path_buf(),
    ));
    let extractor = Arc::new(FakeExtractor::new(behaviour));
    let converter = Arc::new(FakeConverter::new());
    let monitor = Arc::new(DependencyMonitor::new(
        events.clone(),
        metrics.clone(),
        10,
        Duration::from_secs(3_600),
    ));
    register(&fixture, &monitor);

    let mut pipeline = PipelinePolicy::default();
    pipeline.promote_interval_secs = 1;
    pipeline.notify_interval_secs = 1;

    let notify = NotifyPolicy {
        batch_limit: 10,
        channel_spacing_secs: 0,
        announce_failures: true,
    };

    let ctx = Arc::new(PipelineContext {
        store: store.clone(),
        placement,
        name_policy: NamePolicy::new(4 * 1024 * 1024 * 1024)?,
        uplink: Arc::clone(&uplink) as Arc<dyn sluice_stage::Uplink>,
        extractor: Arc::clone(&extractor) as Arc<dyn sluice_stage::ArchiveExtractor>,
        converter: Arc::clone(&converter) as Arc<dyn sluice_stage::TextConverter>,
        extract_breaker: CircuitBreaker::new(DEP_EXTRACTOR, sluice_stage::BreakerPolicy::conservative()),
        convert_breaker: CircuitBreaker::new(DEP_CONVERTER, sluice_stage::BreakerPolicy::permissive()),
        extract_lock: tokio::sync::Mutex::new(()),
        monitor,
        events,
        metrics,
        pipeline,
        notify,
        allowed_owners,
    });

    let coordinator = Coordinator::start(ctx).await?;
    Ok(Harness {
        fixture,
        _db_dir: db_dir,
        store,
        coordinator,
        uplink,
        extractor,
        _converter: converter,
    })
}

async fn wait_for<F>(store: &TaskStore, id: Uuid, deadline: Duration, pred: F) -> Result<Task>
where
    F: Fn(&Task) -> bool,
{
    let started = std::time::Instant::now();
    loop {
        if let Some(task) = store.by_id(id).await? {
            if pred(&task) {
                return Ok(task);
            }
            if started.elapsed() > deadline {
                bail!(
                    "task {id} did not reach the expected state; status={:?} notified={}",
                    task.status,
                    task.notified
                );
            }
        } else if started.elapsed() > deadline {
            bail!("task {id} never appeared");
        }
        sleep(Duration::from_millis(50)).await;
    }
}

fn count_files(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|entry| entry.path().is_file())
                .count()
        })
        .unwrap_or(0)
}

#[tokio::test]
async fn happy_text_path_completes_and_notifies() -> Result<()> {
    let harness = harness(ExtractBehaviour::Success { files: 1 }).await?;
    let payload = vec![b'x'; 4_096];
    harness.fixture.stage_inbox_payload("h1", &payload)?;

    let task = harness
        .coordinator
        .submit_task(NewTaskRequest {
            owner_id: 1_001,
            channel_id: 1_001,
            file_name: "creds.txt".to_string(),
            file_size: 4_096,
            type_class: TypeClass::Text,
            uplink_handle: "h1".to_string(),
        })
        .await?;

    let done = wait_for(&harness.store, task.id, Duration::from_secs(20), |task| {
        task.status == TaskStatus::Completed && task.notified
    })
    .await?;

    assert_eq!(done.retry_count, 0);
    let staged = done.staged_path.context("completed task lost its path")?;
    assert!(staged.starts_with(harness.fixture.paths.files_txt()));
    assert!(staged.is_file());
    assert_eq!(count_files(harness.fixture.paths.temp()), 0);

    let sent = harness.uplink.sent();
    assert!(
        sent.iter()
            .any(|(channel, text)| *channel == 1_001 && text.contains("creds.txt")),
        "completion notice missing: {sent:?}"
    );

    harness.coordinator.shutdown(Duration::from_secs(5)).await;
    harness.store.close().await;
    Ok(())
}

#[tokio::test]
async fn happy_archive_path_extracts_and_converts() -> Result<()> {
    let harness = harness(ExtractBehaviour::Success { files: 2 }).await?;
    let payload = vec![b'z'; 8_192];
    harness.fixture.stage_inbox_payload("h2", &payload)?;

    let task = harness
        .coordinator
        .submit_task(NewTaskRequest {
            owner_id: 1_001,
            channel_id: 1_001,
            file_name: "a.zip".to_string(),
            file_size: 8_192,
            type_class: TypeClass::Archive,
            uplink_handle: "h2".to_string(),
        })
        .await?;

    let done = wait_for(&harness.store, task.id, Duration::from_secs(20), |task| {
        task.status == TaskStatus::Completed && task.notified
    })
    .await?;

    // The original archive left the extract-input directory.
    assert_eq!(count_files(harness.fixture.paths.files_all()), 0);
    // Processed extractor output was cleaned up.
    assert_eq!(count_files(harness.fixture.paths.files_pass()), 0);
    // The terminal artifact is in the output directory.
    let staged = done.staged_path.context("completed task lost its path")?;
    assert!(staged.starts_with(harness.fixture.paths.files_txt()));
    assert!(staged.is_file());
    assert_eq!(harness.extractor.calls(), 1);

    let sent = harness.uplink.sent();
    assert!(
        sent.iter().any(|(channel, _)| *channel == 1_001),
        "completion notice missing"
    );

    harness.coordinator.shutdown(Duration::from_secs(5)).await;
    harness.store.close().await;
    Ok(())
}

#[tokio::test]
async fn duplicate_payloads_fail_second_task() -> Result<()> {
    let harness = harness(ExtractBehaviour::Success { files: 1 }).await?;
    let payload = vec![b'd'; 2_048];
    harness.fixture.stage_inbox_payload("h3", &payload)?;
    harness.fixture.stage_inbox_payload("h4", &payload)?;

    let first = harness
        .coordinator
        .submit_task(NewTaskRequest {
            owner_id: 1_001,
            channel_id: 1_001,
            file_name: "one.txt".to_string(),
            file_size: 2_048,
            type_class: TypeClass::Text,
            uplink_handle: "h3".to_string(),
        })
        .await?;
    let second = harness
        .coordinator
        .submit_task(NewTaskRequest {
            owner_id: 1_001,
            channel_id: 1_001,
            file_name: "two.txt".to_string(),
            file_size: 2_048,
            type_class: TypeClass::Text,
            uplink_handle: "h4".to_string(),
        })
        .await?;

    let first_done = wait_for(&harness.store, first.id, Duration::from_secs(20), |task| {
        task.status.is_terminal()
    })
    .await?;
    let second_done = wait_for(&harness.store, second.id, Duration::from_secs(20), |task| {
        task.status.is_terminal()
    })
    .await?;

    let (winner, loser) = if first_done.status == TaskStatus::Completed {
        (first_done, second_done)
    } else {
        (second_done, first_done)
    };
    assert_eq!(winner.status, TaskStatus::Completed);
    assert_eq!(loser.status, TaskStatus::Failed);
    let fault = loser.fault.context("duplicate task carries no fault")?;
    assert_eq!(fault.category, ErrorCategory::Validation);
    assert!(
        fault.message.starts_with("duplicate of "),
        "unexpected message: {}",
        fault.message
    );
    assert!(fault.message.contains(&winner.id.to_string()));

    harness.coordinator.shutdown(Duration::from_secs(5)).await;
    harness.store.close().await;
    Ok(())
}

#[tokio::test]
async fn password_protected_archive_fails_without_completion_notice() -> Result<()> {
    let harness = harness(ExtractBehaviour::PasswordProtected).await?;
    let payload = vec![b'p'; 1_024];
    harness.fixture.stage_inbox_payload("h5", &payload)?;

    let task = harness
        .coordinator
        .submit_task(NewTaskRequest {
            owner_id: 1_001,
            channel_id: 1_001,
            file_name: "locked.zip".to_string(),
            file_size: 1_024,
            type_class: TypeClass::Archive,
            uplink_handle: "h5".to_string(),
        })
        .await?;

    let done = wait_for(&harness.store, task.id, Duration::from_secs(20), |task| {
        task.status == TaskStatus::Failed
    })
    .await?;

    let fault = done.fault.context("failed task carries no fault")?;
    assert_eq!(fault.category, ErrorCategory::ExternalProcess);
    assert_eq!(fault.severity, ErrorSeverity::Medium);

    // No completion notice goes out for a failed task; the optional failure
    // notice never claims success.
    for (_, text) in harness.uplink.sent() {
        assert!(
            !text.contains("processed"),
            "completion notice sent for failed task: {text}"
        );
    }

    harness.coordinator.shutdown(Duration::from_secs(5)).await;
    harness.store.close().await;
    Ok(())
}

#[tokio::test]
async fn offline_extractor_defers_then_recovers() -> Result<()> {
    let tool_dir = tempfile::tempdir()?;
    let tool_path = tool_dir.path().join("extract-tool");

    let harness = harness_with(
        ExtractBehaviour::Success { files: 1 },
        Vec::new(),
        |_fixture, monitor| {
            monitor.register(DependencySpec {
                name: DEP_EXTRACTOR.to_string(),
                kind: DependencyKind::Executable,
                path: tool_path.clone(),
                probe_interval: Duration::from_millis(100),
                fallback: FallbackMode::Queue,
            });
            monitor.register(always_available(DEP_CONVERTER));
        },
    )
    .await?;

    let payload = vec![b'a'; 1_024];
    harness.fixture.stage_inbox_payload("h6", &payload)?;
    let task = harness
        .coordinator
        .submit_task(NewTaskRequest {
            owner_id: 1_001,
            channel_id: 1_001,
            file_name: "later.zip".to_string(),
            file_size: 1_024,
            type_class: TypeClass::Archive,
            uplink_handle: "h6".to_string(),
        })
        .await?;

    // The download finishes but extraction is deferred while the tool is
    // missing.
    let staged = wait_for(&harness.store, task.id, Duration::from_secs(20), |task| {
        task.status == TaskStatus::Downloaded
    })
    .await?;
    sleep(Duration::from_secs(3)).await;
    let still = harness
        .store
        .by_id(staged.id)
        .await?
        .context("task vanished")?;
    assert_eq!(still.status, TaskStatus::Downloaded);
    assert_eq!(harness.extractor.calls(), 0);

    let snapshot = harness
        .coordinator
        .dependency_snapshots()
        .into_iter()
        .find(|snap| snap.name == DEP_EXTRACTOR)
        .context("extractor dependency missing")?;
    assert!(snapshot.consecutive_failures >= 3 || snapshot.queued_ops > 0);

    // Relink the tool; processing resumes without intervention.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::write(&tool_path, "#!/bin/sh\nexit 0\n")?;
        std::fs::set_permissions(&tool_path, std::fs::Permissions::from_mode(0o755))?;
    }
    #[cfg(not(unix))]
    std::fs::write(&tool_path, "tool")?;

    let done = wait_for(&harness.store, task.id, Duration::from_secs(20), |task| {
        task.status == TaskStatus::Completed
    })
    .await?;
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(harness.extractor.calls() >= 1);

    harness.coordinator.shutdown(Duration::from_secs(5)).await;
    harness.store.close().await;
    Ok(())
}

#[tokio::test]
async fn unauthorized_owner_is_rejected_at_admission() -> Result<()> {
    let harness = harness_with(
        ExtractBehaviour::Success { files: 1 },
        vec![42],
        |_fixture, monitor| {
            monitor.register(always_available(DEP_EXTRACTOR));
            monitor.register(always_available(DEP_CONVERTER));
        },
    )
    .await?;

    let result = harness
        .coordinator
        .submit_task(NewTaskRequest {
            owner_id: 7,
            channel_id: 7,
            file_name: "sneaky.txt".to_string(),
            file_size: 10,
            type_class: TypeClass::Text,
            uplink_handle: "h7".to_string(),
        })
        .await;
    assert!(matches!(
        result,
        Err(sluice_engine::EngineError::Unauthorized { owner_id: 7 })
    ));
    assert_eq!(harness.store.counts_by_status().await?.total(), 0);

    // An allow-listed owner is admitted.
    harness.fixture.stage_inbox_payload("h8", &[b'o'; 16])?;
    let admitted = harness
        .coordinator
        .submit_task(NewTaskRequest {
            owner_id: 42,
            channel_id: 42,
            file_name: "fine.txt".to_string(),
            file_size: 16,
            type_class: TypeClass::Text,
            uplink_handle: "h8".to_string(),
        })
        .await?;
    wait_for(&harness.store, admitted.id, Duration::from_secs(20), |task| {
        task.status == TaskStatus::Completed
    })
    .await?;

    harness.coordinator.shutdown(Duration::from_secs(5)).await;
    harness.store.close().await;
    Ok(())
}
