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
#![allow(clippy::multiple_crate_versions)]

//! Binary entrypoint that wires the Sluice services together and blocks
//! until shutdown.

mod bootstrap;
mod error;

use error::AppResult;

#[tokio::main]
async fn main() -> AppResult<()> {
    bootstrap::run_app().await
}
