//! Shared dependency bundle for the pipeline.
//!
//! Everything is constructor-injected; no module-level state. Handlers and
//! the coordinator receive an `Arc<PipelineContext>` and nothing else.

use std::sync::Arc;

use sluice_config::{NotifyPolicy, PipelinePolicy};
use sluice_events::EventBus;
use sluice_placement::{NamePolicy, PlacementService};
use sluice_stage::{ArchiveExtractor, CircuitBreaker, TextConverter, Uplink};
use sluice_tasks::TaskStore;
use sluice_telemetry::Metrics;
use tokio::sync::Mutex;
use tracing::warn;

use crate::monitor::DependencyMonitor;

/// Dependency name registered for the extract tool.
pub const DEP_EXTRACTOR: &str = "extractor";
/// Dependency name registered for the convert tool.
pub const DEP_CONVERTER: &str = "converter";

/// Shared dependencies for worker handlers and the coordinator.
pub struct PipelineContext {
    /// Durable task store; sole source of truth.
    pub store: TaskStore,
    /// Staging-directory placement service.
    pub placement: Arc<PlacementService>,
    /// Pre-transfer filename/size policy.
    pub name_policy: NamePolicy,
    /// Chat-platform uplink.
    pub uplink: Arc<dyn Uplink>,
    /// Archive extractor adapter.
    pub extractor: Arc<dyn ArchiveExtractor>,
    /// Text converter adapter.
    pub converter: Arc<dyn TextConverter>,
    /// Breaker fronting the extract tool.
    pub extract_breaker: CircuitBreaker,
    /// Breaker fronting the convert tool.
    pub convert_breaker: CircuitBreaker,
    /// Serialisation lock held across every extractor invocation. The pool
    /// cap is one as well; this lock is the second line of defence.
    pub extract_lock: Mutex<()>,
    /// Dependency health monitor.
    pub monitor: Arc<DependencyMonitor>,
    /// Event bus.
    pub events: EventBus,
    /// Metrics registry.
    pub metrics: Metrics,
    /// Pool sizing and timer knobs.
    pub pipeline: PipelinePolicy,
    /// Notification batching knobs.
    pub notify: NotifyPolicy,
    /// Static submitter allow list; empty disables the filter.
    pub allowed_owners: Vec<i64>,
}

impl PipelineContext {
    /// Whether the owner may submit tasks.
    #[must_use]
    pub fn owner_allowed(&self, owner_id: i64) -> bool {
        self.allowed_owners.is_empty() || self.allowed_owners.contains(&owner_id)
    }

    /// Publish an event, logging instead of failing when the bus is closed.
    pub fn publish(&self, event: sluice_events::Event) {
        self.metrics.inc_event(event.kind());
        if let Err(error) = self.events.publish(event) {
            warn!(
                event_id = error.event_id(),
                event_kind = error.event_kind(),
                error = %error,
                "failed to publish event"
            );
        }
    }
}

