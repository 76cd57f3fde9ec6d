//! Bounded subprocess execution shared by the tool adapters.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::warn;

use crate::error::{StageError, StageResult};

/// Run a tool to completion under a deadline.
///
/// The working directory is always the shared `files/` root; all tool
/// side-effects are via the filesystem, so stdio is discarded. On deadline
/// the child receives SIGTERM, then SIGKILL after `term_grace`.
pub(crate) async fn run_tool(
    program: &Path,
    args: &[&str],
    envs: &[(&str, &str)],
    work_dir: &Path,
    deadline: Duration,
    term_grace: Duration,
) -> StageResult<()> {
    let mut child = Command::new(program)
        .args(args)
        .envs(envs.iter().copied())
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| StageError::Spawn {
            program: program.to_path_buf(),
            source,
        })?;

    match timeout(deadline, child.wait()).await {
        Ok(Ok(status)) => {
            if status.success() {
                Ok(())
            } else {
                Err(StageError::ToolFailed {
                    program: program.to_path_buf(),
                    code: status.code(),
                })
            }
        }
        Ok(Err(source)) => Err(StageError::Io {
            operation: "run_tool.wait",
            path: program.to_path_buf(),
            source,
        }),
        Err(_elapsed) => {
            terminate(&mut child, program, term_grace).await;
            Err(StageError::Timeout {
                program: program.to_path_buf(),
                deadline_secs: deadline.as_secs(),
            })
        }
    }
}

/// SIGTERM the child, grant it the grace window, then SIGKILL.
async fn terminate(child: &mut Child, program: &Path, term_grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let Ok(raw) = i32::try_from(pid) {
            if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
                warn!(program = %program.display(), error = %err, "SIGTERM delivery failed");
            }
            if timeout(term_grace, child.wait()).await.is_ok() {
                return;
            }
        }
    }

    #[cfg(not(unix))]
    let _ = term_grace;

    if let Err(err) = child.kill().await {
        warn!(program = %program.display(), error = %err, "SIGKILL delivery failed");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::error::Error;
    use std::time::Instant;

    #[tokio::test]
    async fn exit_zero_is_success() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        run_tool(
            Path::new("/bin/true"),
            &[],
            &[],
            dir.path(),
            Duration::from_secs(5),
            Duration::from_millis(100),
        )
        .await?;
        Ok(())
    }

    #[tokio::test]
    async fn non_zero_exit_surfaces_code() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let err = run_tool(
            Path::new("/bin/false"),
            &[],
            &[],
            dir.path(),
            Duration::from_secs(5),
            Duration::from_millis(100),
        )
        .await
        .expect_err("non-zero exit must fail");
        assert!(matches!(err, StageError::ToolFailed { code: Some(1), .. }));
        Ok(())
    }

    #[tokio::test]
    async fn deadline_kills_the_tool() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let started = Instant::now();
        let err = run_tool(
            Path::new("/bin/sleep"),
            &["30"],
            &[],
            dir.path(),
            Duration::from_millis(100),
            Duration::from_millis(100),
        )
        .await
        .expect_err("deadline must fire");
        assert!(matches!(err, StageError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
        Ok(())
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = run_tool(
            Path::new("/nonexistent/tool"),
            &[],
            &[],
            dir.path(),
            Duration::from_secs(1),
            Duration::from_millis(100),
        )
        .await
        .expect_err("missing program must fail to spawn");
        assert!(matches!(err, StageError::Spawn { .. }));
    }
}
