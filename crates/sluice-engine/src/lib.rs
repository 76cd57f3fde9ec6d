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

//! Pipeline engine: worker pools under strict concurrency caps, per-category
//! retry policies, dependency-health monitoring with graceful degradation,
//! startup reconciliation, and the coordinator that owns the lifecycle.

mod context;
mod coordinator;
mod error;
mod handlers;
mod monitor;
mod notify;
mod pool;
mod reconcile;
mod retry;

pub use context::{DEP_CONVERTER, DEP_EXTRACTOR, PipelineContext};
pub use coordinator::{Coordinator, NewTaskRequest};
pub use error::{EngineError, EngineResult, StageFailure};
pub use monitor::{
    DependencyKind, DependencyMonitor, DependencySnapshot, DependencySpec, DependencyStatus,
    DeferredOp, FallbackDecision, FallbackMode, MonitorTick,
};
pub use notify::{NotifySummary, tick as notify_tick};
pub use pool::{Job, PoolHandle, QueueFull, WorkerPool};
pub use reconcile::{ReconcileSummary, reconcile};
pub use retry::{Backoff, RetrySpec, delay_for, spec_for};
