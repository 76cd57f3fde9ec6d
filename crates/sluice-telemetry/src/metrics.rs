//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes a minimal set of counters/gauges relevant to the pipeline.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{TelemetryError, TelemetryResult};

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: std::sync::Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    tasks_created_total: IntCounter,
    events_emitted_total: IntCounterVec,
    stage_outcomes_total: IntCounterVec,
    transitions_total: IntCounterVec,
    retries_total: IntCounterVec,
    dead_letters_total: IntCounterVec,
    notifications_sent_total: IntCounter,
    sweep_removed_total: IntCounterVec,
    queue_depth: IntGaugeVec,
    in_flight: IntGaugeVec,
    dependency_status: IntGaugeVec,
    breaker_state: IntGaugeVec,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Tasks admitted since start.
    pub tasks_created_total: u64,
    /// Batched completion notices delivered since start.
    pub notifications_sent_total: u64,
    /// Tasks currently owned by the download pool.
    pub download_in_flight: i64,
    /// Tasks currently owned by the extract pool.
    pub extract_in_flight: i64,
    /// Tasks currently owned by the convert pool.
    pub convert_in_flight: i64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    #[allow(clippy::too_many_lines)]
    pub fn new() -> TelemetryResult<Self> {
        let registry = Registry::new();

        let tasks_created_total = IntCounter::with_opts(Opts::new(
            "tasks_created_total",
            "Tasks admitted into the pipeline",
        ))
        .map_err(|err| TelemetryError::registry("tasks_created_total", err))?;
        let events_emitted_total = IntCounterVec::new(
            Opts::new("events_emitted_total", "Domain events emitted by type"),
            &["type"],
        )
        .map_err(|err| TelemetryError::registry("events_emitted_total", err))?;
        let stage_outcomes_total = IntCounterVec::new(
            Opts::new(
                "stage_outcomes_total",
                "Stage attempts finished by stage and outcome",
            ),
            &["stage", "outcome"],
        )
        .map_err(|err| TelemetryError::registry("stage_outcomes_total", err))?;
        let transitions_total = IntCounterVec::new(
            Opts::new(
                "task_transitions_total",
                "Committed task status transitions by target status",
            ),
            &["to"],
        )
        .map_err(|err| TelemetryError::registry("task_transitions_total", err))?;
        let retries_total = IntCounterVec::new(
            Opts::new("retries_total", "Retry attempts scheduled by category"),
            &["category"],
        )
        .map_err(|err| TelemetryError::registry("retries_total", err))?;
        let dead_letters_total = IntCounterVec::new(
            Opts::new("dead_letters_total", "Tasks dead-lettered by reason"),
            &["reason"],
        )
        .map_err(|err| TelemetryError::registry("dead_letters_total", err))?;
        let notifications_sent_total = IntCounter::with_opts(Opts::new(
            "notifications_sent_total",
            "Batched completion notices delivered",
        ))
        .map_err(|err| TelemetryError::registry("notifications_sent_total", err))?;
        let sweep_removed_total = IntCounterVec::new(
            Opts::new(
                "sweep_removed_total",
                "Stale staging entries removed by directory",
            ),
            &["directory"],
        )
        .map_err(|err| TelemetryError::registry("sweep_removed_total", err))?;
        let queue_depth = IntGaugeVec::new(
            Opts::new("queue_depth", "Queued tasks per worker pool"),
            &["stage"],
        )
        .map_err(|err| TelemetryError::registry("queue_depth", err))?;
        let in_flight = IntGaugeVec::new(
            Opts::new("in_flight", "Tasks currently executing per worker pool"),
            &["stage"],
        )
        .map_err(|err| TelemetryError::registry("in_flight", err))?;
        let dependency_status = IntGaugeVec::new(
            Opts::new(
                "dependency_status",
                "Dependency health (0 unknown, 1 available, 2 degraded, 3 unavailable)",
            ),
            &["name"],
        )
        .map_err(|err| TelemetryError::registry("dependency_status", err))?;
        let breaker_state = IntGaugeVec::new(
            Opts::new(
                "breaker_state",
                "Circuit breaker state per tool (0 closed, 1 half-open, 2 open)",
            ),
            &["tool"],
        )
        .map_err(|err| TelemetryError::registry("breaker_state", err))?;

        for (name, collector) in [
            (
                "tasks_created_total",
                Box::new(tasks_created_total.clone()) as Box<dyn prometheus::core::Collector>,
            ),
            ("events_emitted_total", Box::new(events_emitted_total.clone())),
            ("stage_outcomes_total", Box::new(stage_outcomes_total.clone())),
            ("task_transitions_total", Box::new(transitions_total.clone())),
            ("retries_total", Box::new(retries_total.clone())),
            ("dead_letters_total", Box::new(dead_letters_total.clone())),
            (
                "notifications_sent_total",
                Box::new(notifications_sent_total.clone()),
            ),
            ("sweep_removed_total", Box::new(sweep_removed_total.clone())),
            ("queue_depth", Box::new(queue_depth.clone())),
            ("in_flight", Box::new(in_flight.clone())),
            ("dependency_status", Box::new(dependency_status.clone())),
            ("breaker_state", Box::new(breaker_state.clone())),
        ] {
            registry
                .register(collector)
                .map_err(|err| TelemetryError::registry(name, err))?;
        }

        Ok(Self {
            inner: std::sync::Arc::new(MetricsInner {
                registry,
                tasks_created_total,
                events_emitted_total,
                stage_outcomes_total,
                transitions_total,
                retries_total,
                dead_letters_total,
                notifications_sent_total,
                sweep_removed_total,
                queue_depth,
                in_flight,
                dependency_status,
                breaker_state,
            }),
        })
    }

    /// Count an admitted task.
    pub fn inc_task_created(&self) {
        self.inner.tasks_created_total.inc();
    }

    /// Increment the emitted event counter for the specific event type.
    pub fn inc_event(&self, event_type: &str) {
        self.inner
            .events_emitted_total
            .with_label_values(&[event_type])
            .inc();
    }

    /// Record a finished stage attempt.
    pub fn inc_stage_outcome(&self, stage: &str, outcome: &str) {
        self.inner
            .stage_outcomes_total
            .with_label_values(&[stage, outcome])
            .inc();
    }

    /// Record a committed status transition.
    pub fn inc_transition(&self, to: &str) {
        self.inner.transitions_total.with_label_values(&[to]).inc();
    }

    /// Record a scheduled retry attempt.
    pub fn inc_retry(&self, category: &str) {
        self.inner.retries_total.with_label_values(&[category]).inc();
    }

    /// Record a dead-lettered task.
    pub fn inc_dead_letter(&self, reason: &str) {
        self.inner
            .dead_letters_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Count a delivered notification batch.
    pub fn inc_notification(&self) {
        self.inner.notifications_sent_total.inc();
    }

    /// Record entries removed by a staging sweep.
    pub fn add_sweep_removed(&self, directory: &str, removed: u64) {
        self.inner
            .sweep_removed_total
            .with_label_values(&[directory])
            .inc_by(removed);
    }

    /// Set the queue depth gauge for a pool.
    pub fn set_queue_depth(&self, stage: &str, depth: i64) {
        self.inner.queue_depth.with_label_values(&[stage]).set(depth);
    }

    /// Set the in-flight gauge for a pool.
    pub fn set_in_flight(&self, stage: &str, count: i64) {
        self.inner.in_flight.with_label_values(&[stage]).set(count);
    }

    /// Set the dependency health gauge.
    pub fn set_dependency_status(&self, name: &str, status: i64) {
        self.inner
            .dependency_status
            .with_label_values(&[name])
            .set(status);
    }

    /// Set the circuit breaker state gauge.
    pub fn set_breaker_state(&self, tool: &str, state: i64) {
        self.inner.breaker_state.with_label_values(&[tool]).set(state);
    }

    /// Capture a snapshot of pipeline gauges for health reporting.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_created_total: self.inner.tasks_created_total.get(),
            notifications_sent_total: self.inner.notifications_sent_total.get(),
            download_in_flight: self.inner.in_flight.with_label_values(&["download"]).get(),
            extract_in_flight: self.inner.in_flight.with_label_values(&["extract"]).get(),
            convert_in_flight: self.inner.in_flight.with_label_values(&["convert"]).get(),
        }
    }

    /// Render all registered collectors in the Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if sample encoding fails.
    pub fn render(&self) -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.inner.registry.gather(), &mut buffer)
            .map_err(|source| TelemetryError::Encode { source })?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn snapshot_reflects_gauge_updates() -> Result<(), Box<dyn Error>> {
        let metrics = Metrics::new()?;
        metrics.inc_task_created();
        metrics.set_in_flight("download", 2);
        metrics.set_in_flight("extract", 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks_created_total, 1);
        assert_eq!(snapshot.download_in_flight, 2);
        assert_eq!(snapshot.extract_in_flight, 1);
        assert_eq!(snapshot.convert_in_flight, 0);
        Ok(())
    }

    #[test]
    fn render_contains_registered_families() -> Result<(), Box<dyn Error>> {
        let metrics = Metrics::new()?;
        metrics.inc_stage_outcome("extract", "success");
        metrics.inc_dead_letter("max_retries");

        let body = metrics.render()?;
        assert!(body.contains("stage_outcomes_total"));
        assert!(body.contains("dead_letters_total"));
        Ok(())
    }
}
