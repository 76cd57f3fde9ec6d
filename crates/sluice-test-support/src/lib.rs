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

//! Shared fixtures for workspace tests: temp staging roots, sample tasks,
//! and in-process fakes for the external collaborators.

mod fakes;
mod fixtures;

pub use fakes::{ExtractBehaviour, FakeConverter, FakeExtractor, RecordingUplink};
pub use fixtures::{
    StagingFixture, TEST_SECRET, sample_archive_task, sample_text_task, staging_fixture,
};
