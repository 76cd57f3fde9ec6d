//! Pipeline coordinator: lifecycle, admission, promotion, and the single
//! failure path.
//!
//! # Design
//! - Startup is strictly sequential: reconcile, then pools, then tickers.
//! - Two tickers (auto-promote and notify) plus the dependency-monitor tick
//!   share one cancellation source; there is no second scheduler.
//! - Handlers never mark a task `FAILED`; every failure funnels through
//!   `settle_failure`, which owns retries and dead-lettering.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use serde_json::json;
use sluice_events::{Event, Stage, TaskStatus};
use sluice_tasks::{
    DeadLetterReason, ErrorCategory, NewAudit, NewDeadLetter, StatusCounts, Task, TaskFault,
    TypeClass,
};
use sluice_placement::PayloadRoute;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::{DEP_CONVERTER, DEP_EXTRACTOR, PipelineContext};
use crate::error::{EngineError, EngineResult, StageFailure};
use crate::handlers::{self, ConvertDisposition, ExtractDisposition};
use crate::monitor::DependencySnapshot;
use crate::pool::{Job, PoolHandle, WorkerPool};
use crate::reconcile;
use crate::retry;
use crate::notify;

/// Admission payload handed in by the uplink event handler (or the operator
/// API).
#[derive(Debug, Clone)]
pub struct NewTaskRequest {
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
}

/// In-memory scheduling marks. None of this is durable; a crash only costs
/// duplicate scheduling work that the store-level checks absorb.
#[derive(Default)]
struct SchedState {
    in_flight: StdMutex<HashSet<Uuid>>,
    defer_until: StdMutex<HashMap<Uuid, Instant>>,
    monitor_deferred: StdMutex<HashSet<Uuid>>,
}

impl SchedState {
    fn try_claim(&self, id: Uuid) -> bool {
        lock(&self.in_flight).insert(id)
    }

    fn finish(&self, id: Uuid) {
        lock(&self.in_flight).remove(&id);
    }

    fn is_claimed(&self, id: Uuid) -> bool {
        lock(&self.in_flight).contains(&id)
    }

    fn set_defer(&self, id: Uuid, until: Instant) {
        lock(&self.defer_until).insert(id, until);
    }

    fn defer_active(&self, id: Uuid) -> bool {
        let mut map = lock(&self.defer_until);
        match map.get(&id) {
            Some(until) if *until > Instant::now() => true,
            Some(_) => {
                map.remove(&id);
                false
            }
            None => false,
        }
    }

    fn mark_monitor_deferred(&self, id: Uuid) -> bool {
        lock(&self.monitor_deferred).insert(id)
    }

    fn clear_monitor_deferred(&self, id: Uuid) {
        lock(&self.monitor_deferred).remove(&id);
    }

    fn is_monitor_deferred(&self, id: Uuid) -> bool {
        lock(&self.monitor_deferred).contains(&id)
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

struct Inner {
    ctx: Arc<PipelineContext>,
    download: PoolHandle,
    extract: PoolHandle,
    convert: PoolHandle,
    sched: SchedState,
    cancel: CancellationToken,
}

/// Orchestrates the pipeline lifecycle.
pub struct Coordinator {
    inner: Arc<Inner>,
    pools: Vec<WorkerPool>,
    tickers: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Run reconciliation, start the worker pools, and launch the tickers.
    ///
    /// The caller has already opened the store, resolved the staging layout,
    /// and registered dependencies with the monitor; this picks up the boot
    /// order from there.
    ///
    /// # Errors
    ///
    /// Returns an error when reconciliation cannot read the store.
    pub async fn start(ctx: Arc<PipelineContext>) -> EngineResult<Self> {
        reconcile::reconcile(
            &ctx.store,
            &ctx.placement,
            ctx.pipeline.temp_max_age(),
            ctx.pipeline.stage_max_age(),
        )
        .await?;

        let cancel = CancellationToken::new();
        let download_pool = WorkerPool::new(
            Stage::Download,
            ctx.pipeline.download_workers,
            ctx.pipeline.queue_depth,
            ctx.metrics.clone(),
            &cancel,
        );
        let extract_pool = WorkerPool::new(
            Stage::Extract,
            ctx.pipeline.extract_workers,
            ctx.pipeline.queue_depth,
            ctx.metrics.clone(),
            &cancel,
        );
        let convert_pool = WorkerPool::new(
            Stage::Convert,
            ctx.pipeline.convert_workers,
            ctx.pipeline.queue_depth,
            ctx.metrics.clone(),
            &cancel,
        );

        let inner = Arc::new(Inner {
            download: download_pool.handle(),
            extract: extract_pool.handle(),
            convert: convert_pool.handle(),
            sched: SchedState::default(),
            cancel: cancel.clone(),
            ctx: Arc::clone(&ctx),
        });

        let mut tickers = Vec::new();
        tickers.push(spawn_promote_ticker(Arc::clone(&inner)));
        tickers.push(spawn_notify_ticker(Arc::clone(&inner)));
        tickers.push(spawn_monitor_ticker(Arc::clone(&inner)));

        info!("coordinator started");
        Ok(Self {
            inner,
            pools: vec![download_pool, extract_pool, convert_pool],
            tickers,
            cancel,
        })
    }

    /// Shared pipeline context (for the operator surface).
    #[must_use]
    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.inner.ctx
    }

    /// Admit a new task: persist it as `PENDING` and hand it to the download
    /// pool.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` for owners outside the allow list and store
    /// errors verbatim; a full download queue is not an error (the promote
    /// ticker will pick the task up).
    pub async fn submit_task(&self, request: NewTaskRequest) -> EngineResult<Task> {
        let ctx = &self.inner.ctx;
        if !ctx.owner_allowed(request.owner_id) {
            let _ = ctx
                .store
                .record_audit(&NewAudit {
                    task_id: None,
                    actor_id: Some(request.owner_id),
                    action: "admission_denied",
                    old_status: None,
                    new_status: None,
                    detail: format!("owner not on the allow list: {}", request.file_name),
                })
                .await;
            return Err(EngineError::Unauthorized {
                owner_id: request.owner_id,
            });
        }

        let task = Task::new(
            request.owner_id,
            request.channel_id,
            request.file_name,
            request.file_size,
            request.type_class,
            request.uplink_handle,
        );
        ctx.store
            .create(&task)
            .await
            .map_err(|source| EngineError::store("submit.create", source))?;
        ctx.store
            .record_audit(&NewAudit::milestone(
                task.id,
                "task_created",
                format!("{} ({} bytes)", task.file_name, task.file_size),
            ))
            .await
            .map_err(|source| EngineError::store("submit.audit", source))?;
        ctx.metrics.inc_task_created();
        ctx.publish(Event::TaskCreated {
            task_id: task.id,
            file_name: task.file_name.clone(),
        });

        // Eager admission; if the queue is full the next tick catches up.
        if self.inner.sched.try_claim(task.id) {
            let job = download_job(Arc::clone(&self.inner), task.clone());
            if self.inner.download.try_submit(job).is_err() {
                self.inner.sched.finish(task.id);
                debug!(task_id = %task.id, "download queue full; deferred to ticker");
            }
        }

        Ok(task)
    }

    /// Operator-facing dependency snapshots.
    #[must_use]
    pub fn dependency_snapshots(&self) -> Vec<DependencySnapshot> {
        self.inner.ctx.monitor.snapshots()
    }

    /// Aggregate task counts.
    ///
    /// # Errors
    ///
    /// Returns store errors verbatim.
    pub async fn counts(&self) -> EngineResult<StatusCounts> {
        self.inner
            .ctx
            .store
            .counts_by_status()
            .await
            .map_err(|source| EngineError::store("coordinator.counts", source))
    }

    /// Stop intake, drain in-flight work up to `grace`, and join the
    /// tickers. The caller closes the store afterwards.
    pub async fn shutdown(self, grace: Duration) {
        info!("coordinator shutdown initiated");
        self.cancel.cancel();
        for ticker in self.tickers {
            if let Err(err) = ticker.await {
                warn!(error = %err, "ticker join failed");
            }
        }
        for pool in self.pools {
            pool.shutdown(grace).await;
        }
        drop(self.inner);
        info!("coordinator shutdown complete");
    }
}

fn spawn_promote_ticker(inner: Arc<Inner>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(inner.ctx.pipeline.promote_interval());
        loop {
            tokio::select! {
                () = inner.cancel.cancelled() => break,
                _ = ticker.tick() => promote_tick(&inner).await,
            }
        }
        debug!("promote ticker stopped");
    })
}

fn spawn_notify_ticker(inner: Arc<Inner>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(inner.ctx.pipeline.notify_interval());
        loop {
            tokio::select! {
                () = inner.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let _ = notify::tick(&inner.ctx).await;
                }
            }
        }
        debug!("notify ticker stopped");
    })
}

fn spawn_monitor_ticker(inner: Arc<Inner>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = inner
            .ctx
            .monitor
            .min_probe_interval()
            .unwrap_or(Duration::from_secs(30));
        let mut ticker = interval(period);
        loop {
            tokio::select! {
                () = inner.cancel.cancelled() => break,
                _ = ticker.tick() => monitor_tick(&inner).await,
            }
        }
        debug!("monitor ticker stopped");
    })
}

async fn monitor_tick(inner: &Arc<Inner>) {
    let result = inner.ctx.monitor.tick();

    for op in result.ready {
        let task_id = op
            .params
            .get("task_id")
            .and_then(serde_json::Value::as_str)
            .and_then(|text| Uuid::parse_str(text).ok());
        if let Some(task_id) = task_id {
            inner.sched.clear_monitor_deferred(task_id);
        }
        let _ = inner
            .ctx
            .store
            .record_audit(&NewAudit {
                task_id,
                actor_id: None,
                action: "fallback_dispatched",
                old_status: None,
                new_status: None,
                detail: format!("{} recovered; {} released", op.name, op.operation),
            })
            .await;
    }

    for op in result.expired {
        let task_id = op
            .params
            .get("task_id")
            .and_then(serde_json::Value::as_str)
            .and_then(|text| Uuid::parse_str(text).ok());
        if let Some(task_id) = task_id {
            inner.sched.clear_monitor_deferred(task_id);
        }
        let _ = inner
            .ctx
            .store
            .record_audit(&NewAudit {
                task_id,
                actor_id: None,
                action: "fallback_expired",
                old_status: None,
                new_status: None,
                detail: format!("{} still offline after max wait; {} dropped", op.name, op.operation),
            })
            .await;
    }
}

/// One auto-promote pass: admit pending work into the download pool, then
/// move downloaded payloads into their extract directory and enqueue them.
/// Cheap no-op when idle.
async fn promote_tick(inner: &Arc<Inner>) {
    let ctx = &inner.ctx;

    #[allow(clippy::cast_possible_wrap)]
    let batch = ctx.pipeline.queue_depth as i64;
    match ctx.store.pending(batch).await {
        Ok(pending) => {
            for task in pending {
                if !inner.sched.try_claim(task.id) {
                    continue;
                }
                let job = download_job(Arc::clone(inner), task.clone());
                if inner.download.try_submit(job).is_err() {
                    inner.sched.finish(task.id);
                    // Backpressure: skip the rest of this tick, never drop.
                    break;
                }
            }
        }
        Err(err) => warn!(error = %err, "pending scan failed"),
    }

    match ctx.store.by_status(TaskStatus::Downloaded).await {
        Ok(downloaded) => {
            for task in downloaded {
                if inner.sched.is_claimed(task.id)
                    || inner.sched.defer_active(task.id)
                    || inner.sched.is_monitor_deferred(task.id)
                {
                    continue;
                }
                if !dependencies_ready(inner, &task) {
                    continue;
                }
                let task = match ensure_promoted(inner, task).await {
                    Some(task) => task,
                    None => continue,
                };
                if !inner.sched.try_claim(task.id) {
                    continue;
                }
                let job = extract_job(Arc::clone(inner), task.clone());
                if inner.extract.try_submit(job).is_err() {
                    inner.sched.finish(task.id);
                    break;
                }
            }
        }
        Err(err) => warn!(error = %err, "downloaded scan failed"),
    }
}

/// Archive tasks need the extractor; everything needs the converter only
/// when a conversion will actually run.
fn dependencies_ready(inner: &Arc<Inner>, task: &Task) -> bool {
    let ctx = &inner.ctx;
    let needed = match task.type_class {
        TypeClass::Archive => {
            if !ctx.monitor.is_available(DEP_EXTRACTOR) {
                Some((DEP_EXTRACTOR, "extract_task"))
            } else if !ctx.monitor.is_available(DEP_CONVERTER) {
                Some((DEP_CONVERTER, "convert_task"))
            } else {
                None
            }
        }
        TypeClass::Text => None,
    };

    let Some((dependency, operation)) = needed else {
        return true;
    };

    // Queue the deferral once; later ticks just skip until the monitor
    // releases the mark.
    if inner.sched.mark_monitor_deferred(task.id) {
        let _ = ctx
            .monitor
            .handle_unavailable(dependency, operation, json!({ "task_id": task.id }));
    }
    false
}

/// Move the payload into its typed extract directory when it is not already
/// there. Returns the refreshed task, or `None` when the move failed and the
/// next tick should retry.
async fn ensure_promoted(inner: &Arc<Inner>, task: Task) -> Option<Task> {
    let ctx = &inner.ctx;
    let paths = ctx.placement.paths();
    let Some(staged) = task.staged_path.clone() else {
        warn!(task_id = %task.id, "downloaded task has no staged path; awaiting reconciliation");
        return None;
    };

    let (route, target_dir) = match task.type_class {
        TypeClass::Archive => (PayloadRoute::Archive, paths.files_all()),
        TypeClass::Text => (PayloadRoute::Text, paths.files_txt()),
    };
    if staged.starts_with(target_dir) {
        return Some(task);
    }

    let placement = {
        let service = Arc::clone(&ctx.placement);
        let task_id = task.id;
        let file_name = task.file_name.clone();
        let staged = staged.clone();
        tokio::task::spawn_blocking(move || {
            service.promote_to_extract(task_id, route, &staged, &file_name)
        })
        .await
    };

    match placement {
        Ok(Ok(placement)) => {
            let mut updated = task;
            updated.staged_path = Some(placement.path);
            match ctx.store.update(&updated).await {
                Ok(()) => Some(updated),
                Err(err) => {
                    warn!(task_id = %updated.id, error = %err, "staged path update failed");
                    None
                }
            }
        }
        Ok(Err(err)) => {
            warn!(task_id = %task.id, error = %err, "promotion move failed; will retry");
            None
        }
        Err(err) => {
            warn!(task_id = %task.id, error = %err, "promotion worker panicked");
            None
        }
    }
}

fn download_job(inner: Arc<Inner>, task: Task) -> Job {
    Box::pin(async move {
        let ctx = &inner.ctx;
        let task = match ctx
            .store
            .transition(task.id, TaskStatus::Downloading, None, None)
            .await
        {
            Ok(task) => task,
            Err(err) => {
                warn!(task_id = %task.id, error = %err, "downloading transition failed");
                inner.sched.finish(task.id);
                return;
            }
        };
        ctx.metrics.inc_transition(TaskStatus::Downloading.as_str());
        ctx.publish(Event::StatusChanged {
            task_id: task.id,
            from: TaskStatus::Pending,
            to: TaskStatus::Downloading,
        });
        ctx.publish(Event::StageStarted {
            task_id: task.id,
            stage: Stage::Download,
        });

        let outcome = timeout(ctx.pipeline.download_timeout(), handlers::download(ctx, &task)).await;
        match outcome {
            Ok(Ok(updated)) => {
                ctx.metrics.inc_stage_outcome(Stage::Download.as_str(), "success");
                ctx.metrics.inc_transition(TaskStatus::Downloaded.as_str());
                ctx.publish(Event::StageCompleted {
                    task_id: updated.id,
                    stage: Stage::Download,
                });
                ctx.publish(Event::StatusChanged {
                    task_id: updated.id,
                    from: TaskStatus::Downloading,
                    to: TaskStatus::Downloaded,
                });
                let _ = ctx
                    .store
                    .record_audit(&NewAudit::transition(
                        updated.id,
                        TaskStatus::Downloading,
                        TaskStatus::Downloaded,
                        "payload staged and hashed".to_string(),
                    ))
                    .await;
                inner.sched.finish(updated.id);
            }
            Ok(Err(failure)) => settle_failure(&inner, task, Stage::Download, failure).await,
            Err(_elapsed) => {
                let failure = StageFailure::deadline(TaskFault::new(
                    ErrorCategory::Network,
                    "download deadline exceeded",
                ));
                settle_failure(&inner, task, Stage::Download, failure).await;
            }
        }
    })
}

fn extract_job(inner: Arc<Inner>, task: Task) -> Job {
    Box::pin(async move {
        let ctx = &inner.ctx;
        ctx.publish(Event::StageStarted {
            task_id: task.id,
            stage: Stage::Extract,
        });

        match handlers::extract(ctx, &task).await {
            Ok(ExtractDisposition::Extracted { produced }) => {
                ctx.metrics.inc_stage_outcome(Stage::Extract.as_str(), "success");
                ctx.publish(Event::StageCompleted {
                    task_id: task.id,
                    stage: Stage::Extract,
                });
                let _ = ctx
                    .store
                    .record_audit(&NewAudit::milestone(
                        task.id,
                        "extracted",
                        format!("{produced} file(s) produced"),
                    ))
                    .await;
                chain_convert(&inner, task).await;
            }
            Ok(ExtractDisposition::TextReady) => {
                ctx.metrics.inc_stage_outcome(Stage::Extract.as_str(), "success");
                ctx.publish(Event::StageCompleted {
                    task_id: task.id,
                    stage: Stage::Extract,
                });
                chain_convert(&inner, task).await;
            }
            Ok(ExtractDisposition::Deferred) => {
                ctx.metrics.inc_stage_outcome(Stage::Extract.as_str(), "deferred");
                inner.sched.mark_monitor_deferred(task.id);
                inner.sched.finish(task.id);
            }
            Err(failure) => settle_failure(&inner, task, Stage::Extract, failure).await,
        }
    })
}

/// Hand the task straight to the convert pool; awaiting a full queue here is
/// the extract worker's backpressure.
async fn chain_convert(inner: &Arc<Inner>, task: Task) {
    let job = convert_job(Arc::clone(inner), task.clone());
    if inner.convert.submit(job).await.is_err() {
        // Only happens at shutdown; the task stays DOWNLOADED for the next
        // run to finish.
        inner.sched.finish(task.id);
    }
}

fn convert_job(inner: Arc<Inner>, task: Task) -> Job {
    Box::pin(async move {
        let ctx = &inner.ctx;
        ctx.publish(Event::StageStarted {
            task_id: task.id,
            stage: Stage::Convert,
        });

        match handlers::convert(ctx, &task).await {
            Ok(ConvertDisposition::Converted { output }) => {
                complete_task(&inner, task, output).await;
            }
            Ok(ConvertDisposition::Deferred) => {
                ctx.metrics.inc_stage_outcome(Stage::Convert.as_str(), "deferred");
                inner.sched.mark_monitor_deferred(task.id);
                inner.sched.finish(task.id);
            }
            Err(failure) => settle_failure(&inner, task, Stage::Convert, failure).await,
        }
    })
}

async fn complete_task(inner: &Arc<Inner>, task: Task, output: std::path::PathBuf) {
    let ctx = &inner.ctx;
    let mut updated = task.clone();
    updated.staged_path = Some(output.clone());
    updated.status = TaskStatus::Completed;
    updated.completed_at = Some(chrono::Utc::now());

    match ctx.store.update(&updated).await {
        Ok(()) => {
            ctx.metrics.inc_stage_outcome(Stage::Convert.as_str(), "success");
            ctx.metrics.inc_transition(TaskStatus::Completed.as_str());
            ctx.publish(Event::StageCompleted {
                task_id: task.id,
                stage: Stage::Convert,
            });
            ctx.publish(Event::StatusChanged {
                task_id: task.id,
                from: TaskStatus::Downloaded,
                to: TaskStatus::Completed,
            });
            ctx.publish(Event::TaskCompleted {
                task_id: task.id,
                output_path: output.to_string_lossy().into_owned(),
            });
            let _ = ctx
                .store
                .record_audit(&NewAudit::transition(
                    task.id,
                    TaskStatus::Downloaded,
                    TaskStatus::Completed,
                    format!("terminal artifact at {}", output.display()),
                ))
                .await;
            info!(task_id = %task.id, output = %output.display(), "task completed");
        }
        Err(err) => {
            // The attempt never happened as far as the store is concerned;
            // the task stays DOWNLOADED and the next tick re-runs it.
            warn!(task_id = %task.id, error = %err, "completion write failed");
        }
    }
    inner.sched.finish(task.id);
}

/// The single failure path: decide between a scheduled retry and the
/// dead-letter table. Only this function transitions tasks to `FAILED`.
async fn settle_failure(inner: &Arc<Inner>, task: Task, stage: Stage, failure: StageFailure) {
    let ctx = &inner.ctx;
    ctx.metrics.inc_stage_outcome(stage.as_str(), "failure");
    ctx.publish(Event::StageFailed {
        task_id: task.id,
        stage,
        message: failure.fault.message.clone(),
    });

    let retries_done = u32::try_from(task.retry_count).unwrap_or(u32::MAX);
    let attempts_made = retries_done.saturating_add(1);

    if failure.retryable {
        let spec = retry::spec_for(failure.fault.category);
        let within_budget = retries_done < ctx.pipeline.max_retries;
        if within_budget && let Some(delay) = retry::delay_for(spec, attempts_made) {
            ctx.metrics.inc_retry(failure.fault.category.as_str());
            let _ = ctx
                .store
                .record_audit(&NewAudit::milestone(
                    task.id,
                    "retry_scheduled",
                    format!(
                        "attempt {attempts_made} failed at {}; retrying in {delay:?}",
                        stage.as_str()
                    ),
                ))
                .await;

            match stage {
                Stage::Download => schedule_download_retry(inner, &task, attempts_made, delay),
                Stage::Extract | Stage::Convert => {
                    // The task stays DOWNLOADED; the promote ticker re-runs
                    // it once the defer window passes.
                    if let Err(err) = ctx
                        .store
                        .transition(
                            task.id,
                            TaskStatus::Downloaded,
                            None,
                            Some(i64::from(attempts_made)),
                        )
                        .await
                    {
                        warn!(task_id = %task.id, error = %err, "retry bookkeeping failed");
                    }
                    inner.sched.set_defer(task.id, Instant::now() + delay);
                    inner.sched.finish(task.id);
                }
            }
            return;
        }
    }

    dead_letter(inner, task, stage, failure).await;
}

/// Park the failed download, then return the task to `PENDING` after the
/// backoff delay. A crash during the delay leaves it `DOWNLOADING` for the
/// reconciler to demote.
fn schedule_download_retry(inner: &Arc<Inner>, task: &Task, attempts_made: u32, delay: Duration) {
    let inner = Arc::clone(inner);
    let task_id = task.id;
    tokio::spawn(async move {
        tokio::select! {
            () = inner.cancel.cancelled() => {}
            () = sleep(delay) => {
                match inner
                    .ctx
                    .store
                    .transition(task_id, TaskStatus::Pending, None, Some(i64::from(attempts_made)))
                    .await
                {
                    Ok(_) => {
                        inner.ctx.publish(Event::StatusChanged {
                            task_id,
                            from: TaskStatus::Downloading,
                            to: TaskStatus::Pending,
                        });
                    }
                    Err(err) => {
                        warn!(task_id = %task_id, error = %err, "retry requeue failed");
                    }
                }
            }
        }
        inner.sched.finish(task_id);
    });
}

async fn dead_letter(inner: &Arc<Inner>, task: Task, stage: Stage, failure: StageFailure) {
    let ctx = &inner.ctx;
    let exhausted = failure.retryable;
    let reason = failure.reason_override.unwrap_or_else(|| {
        DeadLetterReason::classify(&failure.fault, exhausted, failure.timed_out)
    });

    let letter = NewDeadLetter::capture(
        &task,
        reason,
        failure.fault.clone(),
        Some(json!({
            "stage": stage.as_str(),
            "attempts": task.retry_count + 1,
        })),
    );
    if let Err(err) = ctx.store.push_dead_letter(&letter).await {
        warn!(task_id = %task.id, error = %err, "dead-letter capture failed");
    }

    match ctx
        .store
        .transition(task.id, TaskStatus::Failed, Some(&failure.fault), None)
        .await
    {
        Ok(_) => {
            ctx.metrics.inc_transition(TaskStatus::Failed.as_str());
            ctx.metrics.inc_dead_letter(reason.as_str());
            ctx.publish(Event::StatusChanged {
                task_id: task.id,
                from: task.status,
                to: TaskStatus::Failed,
            });
            ctx.publish(Event::TaskDeadLettered {
                task_id: task.id,
                reason: reason.as_str().to_string(),
            });
            let _ = ctx
                .store
                .record_audit(&NewAudit::transition(
                    task.id,
                    task.status,
                    TaskStatus::Failed,
                    format!("{} ({})", failure.fault.message, reason.as_str()),
                ))
                .await;
            info!(
                task_id = %task.id,
                stage = stage.as_str(),
                reason = reason.as_str(),
                "task dead-lettered"
            );
        }
        Err(err) => {
            // StorageFault semantics: the attempt never happened. The task
            // keeps its previous status and a later tick will retry it.
            warn!(task_id = %task.id, error = %err, "failed transition did not commit");
        }
    }
    inner.sched.finish(task.id);
}
