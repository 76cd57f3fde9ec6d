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

//! Durable task model and the SQLite-backed store that is the sole source of
//! truth for every file in flight.

mod error;
mod fault;
mod model;
mod store;

pub use error::{TaskStoreError, TaskStoreResult};
pub use fault::{DeadLetterReason, ErrorCategory, ErrorSeverity, TaskFault};
pub use model::{AuditRecord, DeadLetter, NewAudit, NewDeadLetter, StatusCounts, Task, TypeClass};
pub use store::TaskStore;

pub use sluice_events::TaskStatus;
