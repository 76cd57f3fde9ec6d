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

//! On-disk staging for the pipeline: directory resolution, at-most-once file
//! placement, admission screening, and stale sweeps.

mod digest;
mod error;
mod policy;
mod resolver;
mod service;

pub use digest::hash_file;
pub use error::{PlacementError, PlacementResult};
pub use policy::{NamePolicy, ScreenVerdict, sanitize_name};
pub use resolver::StagingPaths;
pub use service::{Placement, PlacementService, PayloadRoute};
