//! Stage handlers: the per-task work each pool executes.
//!
//! Handlers never mutate `status` to a terminal state themselves; they
//! return typed outcomes and the coordinator commits transitions, routes
//! retries, and dead-letters. The only writes here are the success-path
//! updates the flow itself requires (staged path, hash, `DOWNLOADED`).

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use sluice_placement::{ScreenVerdict, hash_file, sanitize_name};
use sluice_stage::{ConvertRequest, ExtractRequest, StageError};
use sluice_tasks::{DeadLetterReason, ErrorCategory, ErrorSeverity, Task, TaskFault, TaskStatus, TypeClass};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::{DEP_CONVERTER, DEP_EXTRACTOR, PipelineContext};
use crate::error::StageFailure;
use crate::monitor::FallbackDecision;

/// Outcome of an extract attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExtractDisposition {
    /// The extractor produced output in the success directory.
    Extracted {
        /// Files newly produced in `pass/`.
        produced: usize,
    },
    /// Text payloads skip extraction; the payload was verified in place.
    TextReady,
    /// The extract dependency is offline; the task was deferred.
    Deferred,
}

/// Outcome of a convert attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConvertDisposition {
    /// The terminal artifact was produced.
    Converted {
        /// Path of the terminal artifact under `files/txt/`.
        output: PathBuf,
    },
    /// The convert dependency is offline; the task was deferred.
    Deferred,
}

/// Download: locate, screen, hash, dedupe, stage, persist.
pub(crate) async fn download(ctx: &PipelineContext, task: &Task) -> Result<Task, StageFailure> {
    let src = ctx
        .uplink
        .locate_file(&task.uplink_handle)
        .await
        .map_err(|err| StageFailure::from_stage(&err))?;

    let (hash, actual_size) = run_blocking({
        let src = src.clone();
        move || hash_file(&src)
    })
    .await?
    .map_err(|err| StageFailure::from_placement(&err))?;

    let declared = task.file_size;
    match ctx
        .name_policy
        .screen(&task.file_name, declared, i64::try_from(actual_size).unwrap_or(i64::MAX))
    {
        ScreenVerdict::Clean => {}
        ScreenVerdict::Reject(reason) => {
            return Err(StageFailure::terminal(TaskFault::new(
                ErrorCategory::Validation,
                reason,
            )));
        }
        ScreenVerdict::Quarantine(reason) => {
            quarantine_payload(ctx, task.id, src, reason).await;
            return Err(StageFailure::terminal(TaskFault::new(
                ErrorCategory::Validation,
                reason,
            )));
        }
    }

    if let Some(winner) = ctx
        .store
        .by_hash(&hash)
        .await
        .map_err(|err| StageFailure::from_store(&err))?
        && winner.id != task.id
    {
        return Err(StageFailure::terminal(TaskFault::duplicate_of(winner.id)));
    }

    let safe_name = sanitize_name(&task.file_name);
    let placement = run_blocking({
        let service = Arc::clone(&ctx.placement);
        let task_id = task.id;
        let src = src.clone();
        move || service.stage_into_temp(task_id, &safe_name, &src)
    })
    .await?
    .map_err(|err| StageFailure::from_placement(&err))?;

    let mut updated = task.clone();
    updated.content_hash = Some(hash.clone());
    updated.staged_path = Some(placement.path);
    updated.status = TaskStatus::Downloaded;
    match ctx.store.update(&updated).await {
        Ok(()) => {
            info!(task_id = %task.id, hash = %hash, "payload staged and recorded");
            Ok(updated)
        }
        // A racing task committed the same hash between our lookup and this
        // write; surface it as the duplicate it is.
        Err(sluice_tasks::TaskStoreError::Conflict { .. }) => {
            let winner = ctx.store.by_hash(&hash).await.ok().flatten();
            let fault = winner.map_or_else(
                || TaskFault::new(ErrorCategory::Validation, "duplicate of unknown task"),
                |winner| TaskFault::duplicate_of(winner.id),
            );
            Err(StageFailure::terminal(fault))
        }
        Err(err) => Err(StageFailure::from_store(&err)),
    }
}

/// Extract: serialized invocation of the external extractor.
pub(crate) async fn extract(
    ctx: &PipelineContext,
    task: &Task,
) -> Result<ExtractDisposition, StageFailure> {
    // The pool is capacity one; this lock is the invariant's second line of
    // defence against a misconfigured pool.
    let _serial = ctx.extract_lock.lock().await;

    match task.type_class {
        TypeClass::Text => verify_text_payload(ctx, task).map(|()| ExtractDisposition::TextReady),
        TypeClass::Archive => extract_archive(ctx, task).await,
    }
}

fn verify_text_payload(ctx: &PipelineContext, task: &Task) -> Result<(), StageFailure> {
    let Some(staged) = task.staged_path.as_deref() else {
        return Err(StageFailure::new(TaskFault::new(
            ErrorCategory::FilesystemTransient,
            "text payload has no staged path",
        )));
    };
    let expected_dir = ctx.placement.paths().files_txt();
    if staged.starts_with(expected_dir) && staged.is_file() {
        debug!(task_id = %task.id, "text payload verified in output directory");
        Ok(())
    } else {
        Err(StageFailure::new(TaskFault::new(
            ErrorCategory::FilesystemTransient,
            "text payload is not in the output directory",
        )))
    }
}

async fn extract_archive(
    ctx: &PipelineContext,
    task: &Task,
) -> Result<ExtractDisposition, StageFailure> {
    let Some(staged) = task.staged_path.clone() else {
        return Err(StageFailure::terminal(TaskFault::new(
            ErrorCategory::Critical,
            "archive payload has no staged path",
        )));
    };
    let paths = ctx.placement.paths();
    if !staged.starts_with(paths.files_all()) {
        return Err(StageFailure::new(TaskFault::new(
            ErrorCategory::FilesystemTransient,
            "archive payload is not in the extract input directory",
        )));
    }

    if !ctx.monitor.is_available(DEP_EXTRACTOR) {
        return defer_for_dependency(ctx, DEP_EXTRACTOR, "extract_task", task.id)
            .map(|()| ExtractDisposition::Deferred);
    }

    if !ctx.extract_breaker.admit() {
        ctx.metrics
            .set_breaker_state(DEP_EXTRACTOR, ctx.extract_breaker.state().as_gauge());
        return Err(StageFailure::from_stage(&StageError::CircuitOpen {
            tool: DEP_EXTRACTOR,
        }));
    }

    let outcome = ctx
        .extractor
        .extract(ExtractRequest {
            archive: &staged,
            work_dir: paths.files(),
            pass_dir: paths.files_pass(),
            nopass_dir: paths.files_nopass(),
            deadline: ctx.pipeline.extract_timeout(),
        })
        .await;
    let tool_ok = !matches!(
        outcome,
        Err(StageError::ToolFailed { .. } | StageError::Timeout { .. } | StageError::Spawn { .. })
    );
    ctx.extract_breaker.record(tool_ok);
    ctx.metrics
        .set_breaker_state(DEP_EXTRACTOR, ctx.extract_breaker.state().as_gauge());

    match outcome {
        Ok(result) if result.produced_pass >= 1 => {
            // The archive is consumed; its derived files now carry the task.
            if let Err(err) = fs::remove_file(&staged) {
                warn!(
                    task_id = %task.id,
                    path = %staged.display(),
                    error = %err,
                    "failed to remove consumed archive"
                );
            }
            Ok(ExtractDisposition::Extracted {
                produced: result.produced_pass,
            })
        }
        Ok(result) if result.produced_nopass >= 1 => Err(StageFailure::terminal(
            TaskFault::with_severity(
                ErrorCategory::ExternalProcess,
                ErrorSeverity::Medium,
                "archive is password-protected",
            ),
        )),
        Ok(_) => Err(StageFailure::terminal_with_reason(
            TaskFault::new(
                ErrorCategory::ExternalProcess,
                "extractor exited clean but produced no output",
            ),
            DeadLetterReason::Corruption,
        )),
        Err(err) => Err(StageFailure::from_stage(&err)),
    }
}

/// Convert: invoke the external converter and clean up its inputs.
pub(crate) async fn convert(
    ctx: &PipelineContext,
    task: &Task,
) -> Result<ConvertDisposition, StageFailure> {
    match task.type_class {
        TypeClass::Text => {
            // The payload is already the terminal artifact.
            verify_text_payload(ctx, task)?;
            let output = task
                .staged_path
                .clone()
                .unwrap_or_else(|| ctx.placement.paths().files_txt().to_path_buf());
            Ok(ConvertDisposition::Converted { output })
        }
        TypeClass::Archive => convert_archive(ctx, task).await,
    }
}

async fn convert_archive(
    ctx: &PipelineContext,
    task: &Task,
) -> Result<ConvertDisposition, StageFailure> {
    let paths = ctx.placement.paths();

    if !ctx.monitor.is_available(DEP_CONVERTER) {
        return defer_for_dependency(ctx, DEP_CONVERTER, "convert_task", task.id)
            .map(|()| ConvertDisposition::Deferred);
    }

    if !ctx.convert_breaker.admit() {
        ctx.metrics
            .set_breaker_state(DEP_CONVERTER, ctx.convert_breaker.state().as_gauge());
        return Err(StageFailure::from_stage(&StageError::CircuitOpen {
            tool: DEP_CONVERTER,
        }));
    }

    let stem = sanitize_name(&task.file_name);
    let stem = stem.rsplit_once('.').map_or(stem.clone(), |(s, _)| s.to_string());
    let output_file = paths.files_txt().join(format!("{}_{stem}.txt", task.id));

    let outcome = ctx
        .converter
        .convert(ConvertRequest {
            input_dir: paths.files_pass(),
            output_file: &output_file,
            work_dir: paths.files(),
            deadline: ctx.pipeline.convert_timeout(),
        })
        .await;
    let tool_ok = !matches!(
        outcome,
        Err(StageError::ToolFailed { .. } | StageError::Timeout { .. } | StageError::Spawn { .. })
    );
    ctx.convert_breaker.record(tool_ok);
    ctx.metrics
        .set_breaker_state(DEP_CONVERTER, ctx.convert_breaker.state().as_gauge());

    let result = outcome.map_err(|err| StageFailure::from_stage(&err))?;

    // Diagnostic artefacts are informational, never failures.
    for dir in [paths.files_nopass(), paths.files_errors()] {
        if let Ok(entries) = fs::read_dir(dir) {
            let count = entries.filter_map(Result::ok).count();
            if count > 0 {
                debug!(
                    task_id = %task.id,
                    directory = %dir.display(),
                    entries = count,
                    "diagnostic artefacts present after conversion"
                );
            }
        }
    }

    remove_processed_inputs(task.id, paths.files_pass());

    Ok(ConvertDisposition::Converted {
        output: result.output_file,
    })
}

fn remove_processed_inputs(task_id: Uuid, pass_dir: &std::path::Path) {
    let Ok(entries) = fs::read_dir(pass_dir) else {
        return;
    };
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Err(err) = fs::remove_file(&path) {
            warn!(
                task_id = %task_id,
                path = %path.display(),
                error = %err,
                "failed to remove processed extractor output"
            );
        }
    }
}

fn defer_for_dependency(
    ctx: &PipelineContext,
    dependency: &'static str,
    operation: &'static str,
    task_id: Uuid,
) -> Result<(), StageFailure> {
    let decision = ctx.monitor.handle_unavailable(
        dependency,
        operation,
        serde_json::json!({ "task_id": task_id }),
    );
    match decision {
        FallbackDecision::Deferred => {
            info!(task_id = %task_id, dependency, "stage deferred until dependency recovers");
            Ok(())
        }
        FallbackDecision::Skipped => Err(StageFailure::terminal(TaskFault::new(
            ErrorCategory::Validation,
            format!("{dependency} offline and fallback mode drops work"),
        ))),
        FallbackDecision::Alternate => Err(StageFailure::new(TaskFault::new(
            ErrorCategory::ExternalProcess,
            format!("{dependency} offline; alternative routine not installed"),
        ))),
        FallbackDecision::ManualRequired => Err(StageFailure::terminal(TaskFault::new(
            ErrorCategory::Critical,
            format!("{dependency} offline and requires manual intervention"),
        ))),
    }
}

async fn quarantine_payload(
    ctx: &PipelineContext,
    task_id: Uuid,
    src: PathBuf,
    reason: &'static str,
) {
    let service = Arc::clone(&ctx.placement);
    let outcome =
        tokio::task::spawn_blocking(move || service.quarantine(task_id, &src, reason)).await;
    match outcome {
        Ok(Ok(placement)) => {
            info!(task_id = %task_id, path = %placement.path.display(), "payload quarantined");
        }
        Ok(Err(err)) => {
            warn!(task_id = %task_id, error = %err, "quarantine move failed");
        }
        Err(err) => {
            warn!(task_id = %task_id, error = %err, "quarantine task panicked");
        }
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T, StageFailure>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|err| {
        StageFailure::terminal(TaskFault::new(
            ErrorCategory::Critical,
            format!("blocking stage work panicked: {err}"),
        ))
    })
}
