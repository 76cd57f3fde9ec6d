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

//! Typed configuration for the Sluice pipeline: models, validation, and the
//! TOML/environment loader.

mod defaults;
mod error;
mod loader;
mod model;
mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load, load_from_path};
pub use model::{
    AppProfile, NotifyPolicy, PipelinePolicy, SluiceConfig, ToolsProfile, UplinkProfile,
};
pub use validate::validate;
