//! File placement with at-most-once effect across the staging directories.
//!
//! # Design
//! - Moves are a rename within one filesystem, with a copy + fsync + unlink
//!   fallback across filesystems. The rename path is the optimisation, never
//!   an assumption.
//! - Destination collisions append the task id first and a monotonic counter
//!   afterwards; existing files are never overwritten.
//! - The service performs blocking IO; async callers run it on a blocking
//!   worker.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use sluice_events::{Event, EventBus};
use sluice_telemetry::Metrics;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{PlacementError, PlacementResult};
use crate::resolver::StagingPaths;

/// Collision suffix attempts before giving up on a destination directory.
const MAX_COLLISION_ATTEMPTS: u32 = 1_000;

/// Routing classes understood by the placement layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadRoute {
    /// Routed to `files/all/`, awaiting the extractor.
    Archive,
    /// Routed to `files/txt/`, already in terminal form.
    Text,
}

/// Outcome of a placement operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Final path of the moved payload.
    pub path: PathBuf,
    /// Whether a collision suffix had to be applied.
    pub collision_suffixed: bool,
}

/// Service that moves payloads between the staging directories.
#[derive(Clone)]
pub struct PlacementService {
    paths: StagingPaths,
    events: EventBus,
    metrics: Metrics,
}

impl PlacementService {
    /// Construct a placement service over a resolved staging layout.
    #[must_use]
    pub const fn new(paths: StagingPaths, events: EventBus, metrics: Metrics) -> Self {
        Self {
            paths,
            events,
            metrics,
        }
    }

    /// The resolved staging layout this service operates on.
    #[must_use]
    pub const fn paths(&self) -> &StagingPaths {
        &self.paths
    }

    /// Move a freshly fetched payload from the uplink inbox into
    /// `temp/<task_id>_<safe_name>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is not a regular file or the move
    /// fails.
    pub fn stage_into_temp(
        &self,
        task_id: Uuid,
        safe_name: &str,
        src: &Path,
    ) -> PlacementResult<Placement> {
        ensure_regular_file("stage_into_temp", src)?;
        let destination = self.paths.temp().join(format!("{task_id}_{safe_name}"));
        move_file(src, &destination)?;
        Ok(Placement {
            path: destination,
            collision_suffixed: false,
        })
    }

    /// Promote a downloaded payload from `temp/` into its extract-stage
    /// directory, routed by type.
    ///
    /// # Errors
    ///
    /// Returns an error if the staged payload is missing or the move fails.
    pub fn promote_to_extract(
        &self,
        task_id: Uuid,
        route: PayloadRoute,
        staged: &Path,
        original_name: &str,
    ) -> PlacementResult<Placement> {
        ensure_regular_file("promote_to_extract", staged)?;
        let directory = match route {
            PayloadRoute::Archive => self.paths.files_all(),
            PayloadRoute::Text => self.paths.files_txt(),
        };
        self.place_with_collision_handling(task_id, staged, directory, original_name)
    }

    /// Move a rejected payload into the quarantine directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is missing or the move fails.
    pub fn quarantine(
        &self,
        task_id: Uuid,
        src: &Path,
        reason: &str,
    ) -> PlacementResult<Placement> {
        ensure_regular_file("quarantine", src)?;
        let name = src
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("payload");
        warn!(task_id = %task_id, reason = reason, path = %src.display(), "quarantining payload");
        self.place_with_collision_handling(task_id, src, self.paths.files_errors(), name)
    }

    /// Delete regular files under `directory` older than `max_age`.
    ///
    /// Returns the number of entries removed. Traversal errors are logged and
    /// skipped so a single bad entry cannot wedge the sweep.
    #[must_use]
    pub fn sweep_stale(&self, directory: &Path, max_age: Duration) -> usize {
        let cutoff = SystemTime::now().checked_sub(max_age);
        let Some(cutoff) = cutoff else {
            return 0;
        };

        let mut removed = 0_usize;
        for entry in WalkDir::new(directory).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(
                        error = %err,
                        path = %directory.display(),
                        "failed to traverse sweep directory"
                    );
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let stale = entry
                .metadata()
                .ok()
                .and_then(|meta| meta.modified().ok())
                .is_some_and(|modified| modified < cutoff);
            if !stale {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    info!(path = %entry.path().display(), "removed stale staging file");
                    removed += 1;
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        path = %entry.path().display(),
                        "failed to remove stale staging file"
                    );
                }
            }
        }

        if removed > 0 {
            let directory_label = directory
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("staging")
                .to_string();
            self.metrics
                .add_sweep_removed(&directory_label, removed as u64);
            self.publish_event(Event::SweepCompleted {
                directory: directory_label,
                removed,
            });
        }
        removed
    }

    fn place_with_collision_handling(
        &self,
        task_id: Uuid,
        src: &Path,
        directory: &Path,
        file_name: &str,
    ) -> PlacementResult<Placement> {
        let plain = directory.join(file_name);
        if !plain.exists() {
            move_file(src, &plain)?;
            return Ok(Placement {
                path: plain,
                collision_suffixed: false,
            });
        }

        let (stem, extension) = split_name(file_name);
        let with_id = directory.join(compose_name(&stem, &format!("{task_id}"), &extension));
        if !with_id.exists() {
            move_file(src, &with_id)?;
            return Ok(Placement {
                path: with_id,
                collision_suffixed: true,
            });
        }

        for counter in 1..=MAX_COLLISION_ATTEMPTS {
            let candidate =
                directory.join(compose_name(&stem, &format!("{task_id}_{counter}"), &extension));
            if !candidate.exists() {
                move_file(src, &candidate)?;
                return Ok(Placement {
                    path: candidate,
                    collision_suffixed: true,
                });
            }
        }

        Err(PlacementError::DestinationExhausted {
            directory: directory.to_path_buf(),
            file_name: file_name.to_string(),
        })
    }

    fn publish_event(&self, event: Event) {
        if let Err(error) = self.events.publish(event) {
            warn!(
                event_id = error.event_id(),
                event_kind = error.event_kind(),
                error = %error,
                "failed to publish event"
            );
        }
    }
}

fn ensure_regular_file(operation: &'static str, path: &Path) -> PlacementResult<()> {
    let metadata = fs::symlink_metadata(path)
        .map_err(|source| PlacementError::io(operation, path, source))?;
    if !metadata.is_file() {
        return Err(PlacementError::not_a_file(operation, path));
    }
    Ok(())
}

/// Move a file, falling back to copy + fsync + unlink when the rename
/// crosses filesystems.
fn move_file(src: &Path, dst: &Path) -> PlacementResult<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .map_err(|source| PlacementError::io("move_file.create_parent", parent, source))?;
    }

    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_rename_err) => {
            copy_and_sync(src, dst)?;
            match fs::remove_file(src) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(PlacementError::io("move_file.cleanup", src, err)),
            }
        }
    }
}

fn copy_and_sync(src: &Path, dst: &Path) -> PlacementResult<()> {
    let mut reader =
        File::open(src).map_err(|source| PlacementError::io("move_file.open", src, source))?;
    let mut writer =
        File::create(dst).map_err(|source| PlacementError::io("move_file.create", dst, source))?;
    io::copy(&mut reader, &mut writer)
        .map_err(|source| PlacementError::io("move_file.copy", dst, source))?;
    writer
        .sync_all()
        .map_err(|source| PlacementError::io("move_file.sync", dst, source))?;
    Ok(())
}

fn split_name(file_name: &str) -> (String, String) {
    file_name.rsplit_once('.').map_or_else(
        || (file_name.to_string(), String::new()),
        |(stem, ext)| (stem.to_string(), format!(".{ext}")),
    )
}

fn compose_name(stem: &str, suffix: &str, extension: &str) -> String {
    format!("{stem}_{suffix}{extension}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StagingPaths;
    use sluice_telemetry::Metrics;
    use std::error::Error;

    fn service(base: &Path) -> Result<PlacementService, Box<dyn Error>> {
        let paths = StagingPaths::resolve(base, "secret1")?;
        Ok(PlacementService::new(
            paths,
            EventBus::with_capacity(16),
            Metrics::new()?,
        ))
    }

    #[test]
    fn stage_into_temp_names_by_task() -> Result<(), Box<dyn Error>> {
        let base = tempfile::tempdir()?;
        let service = service(base.path())?;
        let task_id = Uuid::new_v4();

        let src = service.paths().documents().join("incoming.txt");
        fs::write(&src, b"payload")?;

        let placement = service.stage_into_temp(task_id, "incoming.txt", &src)?;
        assert!(placement.path.exists());
        assert!(!src.exists());
        assert_eq!(
            placement.path.file_name().and_then(|n| n.to_str()),
            Some(format!("{task_id}_incoming.txt").as_str())
        );
        Ok(())
    }

    #[test]
    fn promote_routes_by_type() -> Result<(), Box<dyn Error>> {
        let base = tempfile::tempdir()?;
        let service = service(base.path())?;
        let task_id = Uuid::new_v4();

        let staged = service.paths().temp().join("t_payload.zip");
        fs::write(&staged, b"zipbytes")?;
        let archive =
            service.promote_to_extract(task_id, PayloadRoute::Archive, &staged, "payload.zip")?;
        assert!(archive.path.starts_with(service.paths().files_all()));

        let text_staged = service.paths().temp().join("t_notes.txt");
        fs::write(&text_staged, b"text")?;
        let text =
            service.promote_to_extract(task_id, PayloadRoute::Text, &text_staged, "notes.txt")?;
        assert!(text.path.starts_with(service.paths().files_txt()));
        Ok(())
    }

    #[test]
    fn collisions_append_task_id_then_counter() -> Result<(), Box<dyn Error>> {
        let base = tempfile::tempdir()?;
        let service = service(base.path())?;
        let task_id = Uuid::new_v4();

        fs::write(service.paths().files_all().join("a.zip"), b"occupied")?;
        fs::write(
            service.paths().files_all().join(format!("a_{task_id}.zip")),
            b"occupied",
        )?;

        let staged = service.paths().temp().join("x_a.zip");
        fs::write(&staged, b"new")?;
        let placement =
            service.promote_to_extract(task_id, PayloadRoute::Archive, &staged, "a.zip")?;

        assert!(placement.collision_suffixed);
        let name = placement
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        assert_eq!(name, format!("a_{task_id}_1.zip"));
        // Both prior occupants are untouched.
        assert!(service.paths().files_all().join("a.zip").exists());
        Ok(())
    }

    #[test]
    fn quarantine_lands_in_errors() -> Result<(), Box<dyn Error>> {
        let base = tempfile::tempdir()?;
        let service = service(base.path())?;
        let src = service.paths().documents().join("dropper.exe");
        fs::write(&src, b"mz")?;

        let placement = service.quarantine(Uuid::new_v4(), &src, "blocked pattern")?;
        assert!(placement.path.starts_with(service.paths().files_errors()));
        assert!(!src.exists());
        Ok(())
    }

    #[test]
    fn sweep_removes_only_stale_files() -> Result<(), Box<dyn Error>> {
        let base = tempfile::tempdir()?;
        let service = service(base.path())?;
        let fresh = service.paths().temp().join("fresh.txt");
        fs::write(&fresh, b"fresh")?;

        // A zero-length max age makes everything written before "now" stale.
        std::thread::sleep(Duration::from_millis(20));
        let removed = service.sweep_stale(service.paths().temp(), Duration::from_millis(1));
        assert_eq!(removed, 1);
        assert!(!fresh.exists());

        let untouched = service.paths().temp().join("new.txt");
        fs::write(&untouched, b"new")?;
        let removed = service.sweep_stale(service.paths().temp(), Duration::from_secs(3_600));
        assert_eq!(removed, 0);
        assert!(untouched.exists());
        Ok(())
    }

    #[test]
    fn move_file_refuses_directories() -> Result<(), Box<dyn Error>> {
        let base = tempfile::tempdir()?;
        let service = service(base.path())?;
        let dir = service.paths().documents().join("subdir");
        fs::create_dir_all(&dir)?;

        let result = service.stage_into_temp(Uuid::new_v4(), "subdir", &dir);
        assert!(matches!(result, Err(PlacementError::NotAFile { .. })));
        Ok(())
    }
}
