//! Text converter contract and the default subprocess adapter.
//!
//! The converter's public interface names its input directory and output
//! file through two environment values; that translation happens here and
//! nowhere else. Callers pass paths as plain parameters.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::{StageError, StageResult};
use crate::process::run_tool;

/// Environment value naming the converter's input directory.
const ENV_INPUT_DIR: &str = "CONVERT_INPUT_DIR";
/// Environment value naming the converter's output file.
const ENV_OUTPUT_FILE: &str = "CONVERT_OUTPUT_FILE";

/// Inputs for one conversion run.
#[derive(Debug, Clone, Copy)]
pub struct ConvertRequest<'a> {
    /// Directory of files to convert (the extractor's success output).
    pub input_dir: &'a Path,
    /// File the terminal artifact must be written to.
    pub output_file: &'a Path,
    /// Shared tool working directory (`<root>/files/`).
    pub work_dir: &'a Path,
    /// Deadline for the whole run.
    pub deadline: Duration,
}

/// Result of a successful conversion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertOutcome {
    /// Terminal artifact produced by the tool.
    pub output_file: PathBuf,
}

/// Contract for the external text converter.
#[async_trait]
pub trait TextConverter: Send + Sync {
    /// Run the converter over `input_dir`, producing `output_file`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool cannot be started, exits non-zero,
    /// overruns its deadline, or exits zero without producing the output
    /// file.
    async fn convert(&self, request: ConvertRequest<'_>) -> StageResult<ConvertOutcome>;
}

/// Default adapter: invokes the external converter program.
#[derive(Debug, Clone)]
pub struct ConverterTool {
    program: PathBuf,
    term_grace: Duration,
}

impl ConverterTool {
    /// Build an adapter around the converter executable.
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
impl TextConverter for ConverterTool {
    async fn convert(&self, request: ConvertRequest<'_>) -> StageResult<ConvertOutcome> {
        let input = request.input_dir.to_string_lossy().into_owned();
        let output = request.output_file.to_string_lossy().into_owned();

        info!(
            program = %self.program.display(),
            input_dir = %request.input_dir.display(),
            output_file = %request.output_file.display(),
            "invoking converter"
        );
        run_tool(
            &self.program,
            &[],
            &[(ENV_INPUT_DIR, input.as_str()), (ENV_OUTPUT_FILE, output.as_str())],
            request.work_dir,
            request.deadline,
            self.term_grace,
        )
        .await?;

        if !request.output_file.is_file() {
            return Err(StageError::io(
                "convert.output_missing",
                request.output_file,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "converter exited zero without writing its output file",
                ),
            ));
        }

        Ok(ConvertOutcome {
            output_file: request.output_file.to_path_buf(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    #[tokio::test]
    async fn adapter_translates_paths_to_environment() -> Result<(), Box<dyn Error>> {
        let root = tempfile::tempdir()?;
        let input = root.path().join("pass");
        fs::create_dir_all(&input)?;
        fs::write(input.join("page.txt"), b"text")?;
        let output = root.path().join("txt").join("out.txt");
        fs::create_dir_all(root.path().join("txt"))?;

        // Fake converter: copies everything from $CONVERT_INPUT_DIR into
        // $CONVERT_OUTPUT_FILE.
        let script = root.path().join("fake-convert.sh");
        fs::write(
            &script,
            "#!/bin/sh\ncat \"$CONVERT_INPUT_DIR\"/* > \"$CONVERT_OUTPUT_FILE\"\n",
        )?;
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755))?;

        let tool = ConverterTool::new(script, Duration::from_millis(200));
        let outcome = tool
            .convert(ConvertRequest {
                input_dir: &input,
                output_file: &output,
                work_dir: root.path(),
                deadline: Duration::from_secs(5),
            })
            .await?;

        assert_eq!(outcome.output_file, output);
        assert_eq!(fs::read_to_string(&output)?, "text");
        Ok(())
    }

    #[tokio::test]
    async fn missing_output_fails_despite_exit_zero() -> Result<(), Box<dyn Error>> {
        let root = tempfile::tempdir()?;
        let input = root.path().join("pass");
        fs::create_dir_all(&input)?;

        let script = root.path().join("noop.sh");
        fs::write(&script, "#!/bin/sh\nexit 0\n")?;
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755))?;

        let tool = ConverterTool::new(script, Duration::from_millis(200));
        let err = tool
            .convert(ConvertRequest {
                input_dir: &input,
                output_file: &root.path().join("never.txt"),
                work_dir: root.path(),
                deadline: Duration::from_secs(5),
            })
            .await
            .expect_err("missing output must fail");
        assert!(matches!(err, StageError::Io { .. }));
        Ok(())
    }
}
