#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Contracts for the pipeline's external collaborators (the archive
//! extractor, the text converter, and the chat-platform uplink) plus the
//! default subprocess/HTTP adapters and the circuit breaker that fronts the
//! tools.
//!
//! The traits are the seams: production wires the subprocess adapters, tests
//! install in-process fakes.

mod breaker;
mod convert;
mod error;
mod extract;
mod process;
mod uplink;

pub use breaker::{BreakerPolicy, BreakerState, CircuitBreaker};
pub use convert::{ConvertOutcome, ConvertRequest, ConverterTool, TextConverter};
pub use error::{StageError, StageResult};
pub use extract::{ArchiveExtractor, ExtractOutcome, ExtractRequest, ExtractorTool};
pub use uplink::{LocalUplink, Uplink};
