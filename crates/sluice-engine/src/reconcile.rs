//! Startup reconciliation: re-align persisted task state with the files
//! actually on disk. Runs once, before any worker starts.

use std::path::PathBuf;

use sluice_placement::{PlacementService, hash_file};
use sluice_tasks::{NewAudit, Task, TaskStatus, TaskStore};
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};

/// What one reconciliation pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Pending tasks whose staged file turned up; promoted to downloaded.
    pub resumed: usize,
    /// Downloading tasks demoted back to pending.
    pub demoted: usize,
    /// Downloaded tasks whose payload was found in an extract directory.
    pub repaired: usize,
    /// Downloaded tasks demoted to pending because the payload is gone.
    pub refetched: usize,
    /// Stale files removed from `temp/`.
    pub swept_temp: usize,
    /// Stale files removed from the extract-stage directories.
    pub swept_stage: usize,
}

/// Classify every non-terminal task by filesystem evidence, then sweep the
/// staging directories.
///
/// # Errors
///
/// Returns an error only when the store itself is unusable; individual task
/// repairs that fail are logged and skipped so one bad row cannot block
/// startup.
pub async fn reconcile(
    store: &TaskStore,
    placement: &PlacementService,
    temp_max_age: std::time::Duration,
    stage_max_age: std::time::Duration,
) -> EngineResult<ReconcileSummary> {
    let mut summary = ReconcileSummary::default();

    // Interrupted downloads cannot prove integrity; demote first so the
    // temp-file probe below can re-promote the ones that did finish.
    let downloading = store
        .by_status(TaskStatus::Downloading)
        .await
        .map_err(|source| EngineError::store("reconcile.by_status", source))?;
    for task in downloading {
        match demote_to_pending(store, &task, "interrupted mid-download").await {
            Ok(()) => summary.demoted += 1,
            Err(err) => warn!(task_id = %task.id, error = %err, "demotion failed"),
        }
    }

    let pending = store
        .by_status(TaskStatus::Pending)
        .await
        .map_err(|source| EngineError::store("reconcile.by_status", source))?;
    for task in pending {
        match find_temp_file(placement, &task) {
            Some(found) => match resume_from_temp(store, &task, found).await {
                Ok(()) => summary.resumed += 1,
                Err(err) => warn!(task_id = %task.id, error = %err, "resume failed"),
            },
            None => {
                // Stays pending; the download pool will fetch it.
            }
        }
    }

    let downloaded = store
        .by_status(TaskStatus::Downloaded)
        .await
        .map_err(|source| EngineError::store("reconcile.by_status", source))?;
    for task in downloaded {
        let staged_exists = task
            .staged_path
            .as_deref()
            .is_some_and(std::path::Path::is_file);
        if staged_exists {
            continue;
        }

        if let Some(found) = find_in_stage_dirs(placement, &task) {
            match repair_staged_path(store, &task, found).await {
                Ok(()) => summary.repaired += 1,
                Err(err) => warn!(task_id = %task.id, error = %err, "repair failed"),
            }
        } else {
            match demote_to_pending(store, &task, "staged payload missing on disk").await {
                Ok(()) => summary.refetched += 1,
                Err(err) => warn!(task_id = %task.id, error = %err, "demotion failed"),
            }
        }
    }

    summary.swept_temp = placement.sweep_stale(placement.paths().temp(), temp_max_age);
    for dir in placement.paths().extract_stage_dirs() {
        summary.swept_stage += placement.sweep_stale(dir, stage_max_age);
    }

    info!(
        resumed = summary.resumed,
        demoted = summary.demoted,
        repaired = summary.repaired,
        refetched = summary.refetched,
        swept_temp = summary.swept_temp,
        swept_stage = summary.swept_stage,
        "reconciliation complete"
    );
    Ok(summary)
}

fn find_temp_file(placement: &PlacementService, task: &Task) -> Option<PathBuf> {
    let prefix = format!("{}_", task.id);
    let entries = std::fs::read_dir(placement.paths().temp()).ok()?;
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matched = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(&prefix));
        if matched {
            return Some(path);
        }
    }
    None
}

fn find_in_stage_dirs(placement: &PlacementService, task: &Task) -> Option<PathBuf> {
    for dir in placement.paths().extract_stage_dirs() {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let matched = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.contains(task.file_name.as_str()));
            if matched {
                return Some(path);
            }
        }
    }
    None
}

async fn resume_from_temp(
    store: &TaskStore,
    task: &Task,
    found: PathBuf,
) -> EngineResult<()> {
    // A completed transfer left this file behind; recompute the digest so
    // the downloaded invariant holds.
    let (hash, _size) = {
        let path = found.clone();
        tokio::task::spawn_blocking(move || hash_file(&path))
            .await
            .map_err(|_| {
                EngineError::placement(
                    "reconcile.hash",
                    sluice_placement::PlacementError::InvalidInput {
                        field: "staged_path",
                        reason: "hash_worker_panicked",
                        value: None,
                    },
                )
            })?
            .map_err(|source| EngineError::placement("reconcile.hash", source))?
    };

    let mut updated = task.clone();
    updated.staged_path = Some(found.clone());
    updated.content_hash = Some(hash);
    updated.status = TaskStatus::Downloaded;
    store
        .update(&updated)
        .await
        .map_err(|source| EngineError::store("reconcile.resume", source))?;
    store
        .record_audit(&NewAudit {
            task_id: Some(task.id),
            actor_id: None,
            action: "reconcile_resume",
            old_status: Some(TaskStatus::Pending),
            new_status: Some(TaskStatus::Downloaded),
            detail: format!("staged file found at {}", found.display()),
        })
        .await
        .map_err(|source| EngineError::store("reconcile.audit", source))?;
    info!(task_id = %task.id, path = %found.display(), "resumed from staged file");
    Ok(())
}

async fn repair_staged_path(store: &TaskStore, task: &Task, found: PathBuf) -> EngineResult<()> {
    let mut updated = task.clone();
    updated.staged_path = Some(found.clone());
    store
        .update(&updated)
        .await
        .map_err(|source| EngineError::store("reconcile.repair", source))?;
    store
        .record_audit(&NewAudit {
            task_id: Some(task.id),
            actor_id: None,
            action: "reconcile_repair",
            old_status: Some(TaskStatus::Downloaded),
            new_status: Some(TaskStatus::Downloaded),
            detail: format!("payload located at {}", found.display()),
        })
        .await
        .map_err(|source| EngineError::store("reconcile.audit", source))?;
    info!(task_id = %task.id, path = %found.display(), "staged path repaired");
    Ok(())
}

async fn demote_to_pending(store: &TaskStore, task: &Task, why: &str) -> EngineResult<()> {
    let mut updated = task.clone();
    let old_status = updated.status;
    updated.status = TaskStatus::Pending;
    updated.staged_path = None;
    updated.content_hash = None;
    store
        .update(&updated)
        .await
        .map_err(|source| EngineError::store("reconcile.demote", source))?;
    store
        .record_audit(&NewAudit {
            task_id: Some(task.id),
            actor_id: None,
            action: "reconcile_demote",
            old_status: Some(old_status),
            new_status: Some(TaskStatus::Pending),
            detail: why.to_string(),
        })
        .await
        .map_err(|source| EngineError::store("reconcile.audit", source))?;
    info!(task_id = %task.id, reason = why, "demoted for re-fetch");
    Ok(())
}
