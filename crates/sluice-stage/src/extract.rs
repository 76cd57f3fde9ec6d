//! Archive extractor contract and the default subprocess adapter.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::{StageError, StageResult};
use crate::process::run_tool;

/// Inputs for one extraction run.
#[derive(Debug, Clone, Copy)]
pub struct ExtractRequest<'a> {
    /// Archive sitting in the extract-input directory.
    pub archive: &'a Path,
    /// Shared tool working directory (`<root>/files/`).
    pub work_dir: &'a Path,
    /// Directory successful output lands in.
    pub pass_dir: &'a Path,
    /// Directory password-protected rejects land in.
    pub nopass_dir: &'a Path,
    /// Deadline for the whole run.
    pub deadline: Duration,
}

/// What one extraction run produced, by directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOutcome {
    /// Files newly produced in the success directory.
    pub produced_pass: usize,
    /// Files newly produced in the password-reject directory.
    pub produced_nopass: usize,
}

/// Contract for the external archive extractor.
///
/// The caller holds the serialisation lock; implementations may assume they
/// are never invoked concurrently.
#[async_trait]
pub trait ArchiveExtractor: Send + Sync {
    /// Run the extractor over the archive named in `request`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool cannot be started, exits non-zero, or
    /// overruns its deadline. Exit-zero runs report their output through the
    /// outcome; classification is the caller's business.
    async fn extract(&self, request: ExtractRequest<'_>) -> StageResult<ExtractOutcome>;
}

/// Default adapter: invokes the external extractor program.
#[derive(Debug, Clone)]
pub struct ExtractorTool {
    program: PathBuf,
    term_grace: Duration,
}

impl ExtractorTool {
    /// Build an adapter around the extractor executable.
    #[must_use]
    pub const fn new(program: PathBuf, term_grace: Duration) -> Self {
        Self {
            program,
            term_grace,
        }
    }

    /// Path of the wrapped executable, for dependency registration.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl ArchiveExtractor for ExtractorTool {
    async fn extract(&self, request: ExtractRequest<'_>) -> StageResult<ExtractOutcome> {
        let pass_before = count_files(request.pass_dir)?;
        let nopass_before = count_files(request.nopass_dir)?;

        let archive = request.archive.to_string_lossy().into_owned();
        info!(
            program = %self.program.display(),
            archive = %request.archive.display(),
            "invoking extractor"
        );
        run_tool(
            &self.program,
            &[archive.as_str()],
            &[],
            request.work_dir,
            request.deadline,
            self.term_grace,
        )
        .await?;

        let produced_pass = count_files(request.pass_dir)?.saturating_sub(pass_before);
        let produced_nopass = count_files(request.nopass_dir)?.saturating_sub(nopass_before);
        Ok(ExtractOutcome {
            produced_pass,
            produced_nopass,
        })
    }
}

fn count_files(dir: &Path) -> StageResult<usize> {
    let entries =
        fs::read_dir(dir).map_err(|source| StageError::io("extract.count_files", dir, source))?;
    let mut count = 0_usize;
    for entry in entries {
        let entry =
            entry.map_err(|source| StageError::io("extract.count_files", dir, source))?;
        if entry.file_type().is_ok_and(|t| t.is_file()) {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn count_files_ignores_directories() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("a.txt"), b"a")?;
        fs::write(dir.path().join("b.txt"), b"b")?;
        fs::create_dir(dir.path().join("nested"))?;

        assert_eq!(count_files(dir.path())?, 2);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn adapter_reports_newly_produced_files() -> Result<(), Box<dyn Error>> {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir()?;
        let pass = root.path().join("pass");
        let nopass = root.path().join("nopass");
        fs::create_dir_all(&pass)?;
        fs::create_dir_all(&nopass)?;
        fs::write(pass.join("existing.txt"), b"old")?;

        // Fake extractor: unconditionally drops one file into pass/.
        let script = root.path().join("fake-extract.sh");
        fs::write(&script, "#!/bin/sh\necho extracted > pass/out.txt\n")?;
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755))?;

        let archive = root.path().join("a.zip");
        fs::write(&archive, b"zip")?;

        let tool = ExtractorTool::new(script, Duration::from_millis(200));
        let outcome = tool
            .extract(ExtractRequest {
                archive: &archive,
                work_dir: root.path(),
                pass_dir: &pass,
                nopass_dir: &nopass,
                deadline: Duration::from_secs(5),
            })
            .await?;

        assert_eq!(outcome.produced_pass, 1);
        assert_eq!(outcome.produced_nopass, 0);
        Ok(())
    }
}
