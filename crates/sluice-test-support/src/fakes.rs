//! In-process fakes for the external collaborators. Each implements the
//! corresponding contract trait so tests can run the whole pipeline without
//! subprocesses or network access.

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use sluice_stage::{
    ArchiveExtractor, ConvertOutcome, ConvertRequest, ExtractOutcome, ExtractRequest, StageError,
    StageResult, TextConverter, Uplink,
};

/// What the fake extractor should pretend happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractBehaviour {
    /// Write `files` derived files into `pass/` and report success.
    Success {
        /// Number of files produced.
        files: usize,
    },
    /// Write one reject into `nopass/` and nothing into `pass/`.
    PasswordProtected,
    /// Exit clean without producing anything.
    Empty,
    /// Exit non-zero.
    Fail,
}

/// Scriptable extractor fake.
pub struct FakeExtractor {
    behaviour: Mutex<ExtractBehaviour>,
    calls: AtomicUsize,
}

impl FakeExtractor {
    /// Build a fake with the given behaviour.
    #[must_use]
    pub const fn new(behaviour: ExtractBehaviour) -> Self {
        Self {
            behaviour: Mutex::new(behaviour),
            calls: AtomicUsize::new(0),
        }
    }

    /// Change the scripted behaviour mid-test.
    pub fn set_behaviour(&self, behaviour: ExtractBehaviour) {
        *self
            .behaviour
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = behaviour;
    }

    /// How many times the extractor was invoked.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveExtractor for FakeExtractor {
    async fn extract(&self, request: ExtractRequest<'_>) -> StageResult<ExtractOutcome> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let behaviour = *self
            .behaviour
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        match behaviour {
            ExtractBehaviour::Success { files } => {
                for index in 0..files {
                    let out = request.pass_dir.join(format!("derived_{call}_{index}.txt"));
                    std::fs::write(&out, b"derived content").map_err(|source| StageError::Io {
                        operation: "fake_extract.write",
                        path: out,
                        source,
                    })?;
                }
                Ok(ExtractOutcome {
                    produced_pass: files,
                    produced_nopass: 0,
                })
            }
            ExtractBehaviour::PasswordProtected => {
                let out = request.nopass_dir.join(format!("locked_{call}.zip"));
                std::fs::write(&out, b"still locked").map_err(|source| StageError::Io {
                    operation: "fake_extract.write",
                    path: out,
                    source,
                })?;
                Ok(ExtractOutcome {
                    produced_pass: 0,
                    produced_nopass: 1,
                })
            }
            ExtractBehaviour::Empty => Ok(ExtractOutcome {
                produced_pass: 0,
                produced_nopass: 0,
            }),
            ExtractBehaviour::Fail => Err(StageError::ToolFailed {
                program: PathBuf::from("fake-extract"),
                code: Some(2),
            }),
        }
    }
}

/// Converter fake: concatenates the input directory into the output file.
pub struct FakeConverter {
    fail: AtomicBool,
}

impl FakeConverter {
    /// Build a succeeding fake.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
        }
    }

    /// Toggle failure mode.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl Default for FakeConverter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextConverter for FakeConverter {
    async fn convert(&self, request: ConvertRequest<'_>) -> StageResult<ConvertOutcome> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StageError::ToolFailed {
                program: PathBuf::from("fake-convert"),
                code: Some(1),
            });
        }

        let mut combined = Vec::new();
        let entries =
            std::fs::read_dir(request.input_dir).map_err(|source| StageError::Io {
                operation: "fake_convert.read_dir",
                path: request.input_dir.to_path_buf(),
                source,
            })?;
        for entry in entries.filter_map(Result::ok) {
            if entry.path().is_file()
                && let Ok(bytes) = std::fs::read(entry.path())
            {
                combined.extend_from_slice(&bytes);
            }
        }

        std::fs::write(request.output_file, combined).map_err(|source| StageError::Io {
            operation: "fake_convert.write",
            path: request.output_file.to_path_buf(),
            source,
        })?;
        Ok(ConvertOutcome {
            output_file: request.output_file.to_path_buf(),
        })
    }
}

/// Uplink fake: local inbox lookup plus an in-memory outbox.
pub struct RecordingUplink {
    documents_dir: PathBuf,
    sent: Mutex<Vec<(i64, String)>>,
    fail_sends: AtomicBool,
}

impl RecordingUplink {
    /// Build an uplink over the fixture's inbox directory.
    #[must_use]
    pub const fn new(documents_dir: PathBuf) -> Self {
        Self {
            documents_dir,
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
        }
    }

    /// Messages delivered so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Toggle delivery failures.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Uplink for RecordingUplink {
    async fn locate_file(&self, handle: &str) -> StageResult<PathBuf> {
        if handle.is_empty() || handle.contains(['/', '\\']) {
            return Err(StageError::InvalidHandle {
                handle: handle.to_string(),
            });
        }
        let candidate = self.documents_dir.join(handle);
        if candidate.is_file() {
            Ok(candidate)
        } else {
            Err(StageError::MissingPayload {
                handle: handle.to_string(),
            })
        }
    }

    async fn send_message(&self, channel_id: i64, text: &str) -> StageResult<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(StageError::HttpStatus {
                operation: "send_message",
                url: "fake://uplink".to_string(),
                status: 503,
            });
        }
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((channel_id, text.to_string()));
        Ok(())
    }
}
