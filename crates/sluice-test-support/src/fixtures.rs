//! Temp staging roots and sample tasks.

use anyhow::{Context, Result};
use sluice_placement::StagingPaths;
use sluice_tasks::{Task, TypeClass};
use tempfile::TempDir;

/// Bearer secret used by every test fixture.
pub const TEST_SECRET: &str = "test-secret";

/// A resolved staging layout rooted in a temp directory that lives as long
/// as the fixture.
pub struct StagingFixture {
    /// Keeps the temp directory alive.
    pub base: TempDir,
    /// Resolved layout under `<base>/<secret>/`.
    pub paths: StagingPaths,
}

/// Create a staging layout in a fresh temp directory.
///
/// # Errors
///
/// Returns an error if the temp directory or layout cannot be created.
pub fn staging_fixture() -> Result<StagingFixture> {
    let base = tempfile::tempdir().context("failed to create fixture temp dir")?;
    let paths = StagingPaths::resolve(base.path(), TEST_SECRET)
        .context("failed to resolve staging layout")?;
    Ok(StagingFixture { base, paths })
}

impl StagingFixture {
    /// Drop a payload into the uplink inbox and return its handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be written.
    pub fn stage_inbox_payload(&self, handle: &str, contents: &[u8]) -> Result<()> {
        std::fs::write(self.paths.documents().join(handle), contents)
            .context("failed to stage inbox payload")
    }
}

/// A text task shaped like the happy-path scenario. `size` must match the
/// staged payload for the admission screen to pass.
#[must_use]
pub fn sample_text_task(handle: &str, size: i64) -> Task {
    Task::new(1_001, 1_001, "creds.txt", size, TypeClass::Text, handle)
}

/// An archive task shaped like the happy-path scenario. `size` must match
/// the staged payload for the admission screen to pass.
#[must_use]
pub fn sample_archive_task(handle: &str, size: i64) -> Task {
    Task::new(1_001, 1_001, "a.zip", size, TypeClass::Archive, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_builds_complete_layout() -> Result<()> {
        let fixture = staging_fixture()?;
        assert!(fixture.paths.documents().is_dir());
        assert!(fixture.paths.files_pass().is_dir());
        fixture.stage_inbox_payload("h1", b"bytes")?;
        assert!(fixture.paths.documents().join("h1").is_file());
        Ok(())
    }
}
