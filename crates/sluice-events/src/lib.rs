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
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Core event bus for the Sluice pipeline.
//!
//! The bus provides a typed event enum and sequential identifiers. Live
//! fan-out uses `tokio::broadcast` with a bounded buffer; a ring of recent
//! envelopes backs catch-up reads, so a reconnecting consumer drains
//! `backlog_since` and then follows the live stream. When either bound
//! overflows, the oldest events are dropped.

mod payloads;
mod routing;

pub use payloads::{
    DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId, Stage, TaskStatus,
};
pub use routing::{EventBus, EventBusError, EventBusResult, EventStream};
