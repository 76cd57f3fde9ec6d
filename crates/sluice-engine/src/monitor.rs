//! Dependency health monitor and graceful-degradation queue.
//!
//! Each registered dependency is probed on its own interval by the
//! coordinator's monitor ticker. Failures degrade the dependency before
//! marking it unavailable; work that would call an offline dependency is
//! deferred, skipped, or flagged for an operator according to the configured
//! fallback mode.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sluice_events::{Event, EventBus};
use sluice_telemetry::Metrics;
use tracing::{info, warn};

/// Consecutive failures after which a dependency is unavailable.
const UNAVAILABLE_THRESHOLD: u32 = 3;

/// What kind of filesystem object a probe checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    /// A regular file with execute permission.
    Executable,
    /// A regular file.
    File,
    /// A directory.
    Directory,
}

/// Health states a dependency moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyStatus {
    /// Not probed yet.
    Unknown,
    /// Last probe succeeded.
    Available,
    /// At least one recent probe failed.
    Degraded,
    /// Three or more consecutive probes failed.
    Unavailable,
}

impl DependencyStatus {
    /// Label used in events and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Available => "available",
            Self::Degraded => "degraded",
            Self::Unavailable => "unavailable",
        }
    }

    /// Gauge value exported to metrics.
    #[must_use]
    pub const fn as_gauge(self) -> i64 {
        match self {
            Self::Unknown => 0,
            Self::Available => 1,
            Self::Degraded => 2,
            Self::Unavailable => 3,
        }
    }
}

/// Behaviour when a worker would call an offline dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackMode {
    /// Defer the operation until the dependency recovers.
    Queue,
    /// Drop the operation immediately.
    Skip,
    /// Dispatch a named alternative routine.
    Alternate,
    /// Require operator intervention.
    Manual,
}

/// Decision handed back to a worker that hit an offline dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackDecision {
    /// The operation was queued for replay after recovery.
    Deferred,
    /// The operation was dropped.
    Skipped,
    /// The caller should run its named alternative routine.
    Alternate,
    /// An operator must act before the operation can proceed.
    ManualRequired,
}

/// Registration payload for one dependency.
#[derive(Debug, Clone)]
pub struct DependencySpec {
    /// Unique dependency name.
    pub name: String,
    /// Probe kind.
    pub kind: DependencyKind,
    /// Path the probe inspects.
    pub path: PathBuf,
    /// Interval between probes.
    pub probe_interval: Duration,
    /// Behaviour when the dependency is offline.
    pub fallback: FallbackMode,
}

/// Operation deferred while its dependency is offline.
#[derive(Debug, Clone)]
pub struct DeferredOp {
    /// Monotonic queue identifier.
    pub id: u64,
    /// Dependency the operation waits for.
    pub name: String,
    /// Operation label replayed by the coordinator.
    pub operation: String,
    /// Opaque parameters for the replay.
    pub params: Value,
    /// When the operation was queued.
    pub queued_at: DateTime<Utc>,
    /// How long the operation may wait before expiry.
    pub max_wait: Duration,
}

/// Operator-facing snapshot of one dependency.
#[derive(Debug, Clone, Serialize)]
pub struct DependencySnapshot {
    /// Dependency name.
    pub name: String,
    /// Current status.
    pub status: DependencyStatus,
    /// Timestamp of the last probe, if any.
    pub last_probe: Option<DateTime<Utc>>,
    /// Consecutive failed probes.
    pub consecutive_failures: u32,
    /// Operations currently deferred for this dependency.
    pub queued_ops: usize,
}

/// Result of one monitor tick.
#[derive(Debug, Default)]
pub struct MonitorTick {
    /// Deferred operations whose dependency recovered, ready for replay.
    pub ready: Vec<DeferredOp>,
    /// Deferred operations that waited past their `max_wait`.
    pub expired: Vec<DeferredOp>,
}

struct DependencyRecord {
    spec: DependencySpec,
    status: DependencyStatus,
    last_probe: Option<DateTime<Utc>>,
    last_probe_instant: Option<Instant>,
    consecutive_failures: u32,
}

struct MonitorInner {
    deps: HashMap<String, DependencyRecord>,
    queue: Vec<DeferredOp>,
    next_op_id: u64,
}

/// Periodically probes external collaborators and mediates degraded-mode
/// behaviour.
pub struct DependencyMonitor {
    inner: Mutex<MonitorInner>,
    events: EventBus,
    metrics: Metrics,
    dispatch_batch: usize,
    max_wait: Duration,
}

impl DependencyMonitor {
    /// Construct an empty monitor. `max_wait` bounds how long a deferred
    /// operation may sit in the fallback queue.
    #[must_use]
    pub fn new(
        events: EventBus,
        metrics: Metrics,
        dispatch_batch: usize,
        max_wait: Duration,
    ) -> Self {
        Self {
            inner: Mutex::new(MonitorInner {
                deps: HashMap::new(),
                queue: Vec::new(),
                next_op_id: 1,
            }),
            events,
            metrics,
            dispatch_batch,
            max_wait,
        }
    }

    /// Register a dependency. Re-registering a name replaces its spec but
    /// keeps its probe history.
    pub fn register(&self, spec: DependencySpec) {
        let mut inner = self.lock();
        let name = spec.name.clone();
        match inner.deps.entry(name.clone()) {
            std::collections::hash_map::Entry::Occupied(mut occupied) => {
                occupied.get_mut().spec = spec;
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(DependencyRecord {
                    spec,
                    status: DependencyStatus::Unknown,
                    last_probe: None,
                    last_probe_instant: None,
                    consecutive_failures: 0,
                });
            }
        }
        drop(inner);
        self.metrics
            .set_dependency_status(&name, DependencyStatus::Unknown.as_gauge());
    }

    /// Probe every due dependency and drain the fallback queue.
    ///
    /// Returns deferred operations that are now dispatchable (bounded by the
    /// dispatch batch) and operations that expired waiting.
    #[must_use]
    pub fn tick(&self) -> MonitorTick {
        let mut transitions = Vec::new();
        let mut tick = MonitorTick::default();
        {
            let mut inner = self.lock();

            for record in inner.deps.values_mut() {
                let due = record
                    .last_probe_instant
                    .is_none_or(|at| at.elapsed() >= record.spec.probe_interval);
                if !due {
                    continue;
                }
                let healthy = probe(record.spec.kind, &record.spec.path);
                let old = record.status;
                let new = next_status(old, record.consecutive_failures, healthy);
                record.last_probe = Some(Utc::now());
                record.last_probe_instant = Some(Instant::now());
                if healthy {
                    record.consecutive_failures = 0;
                } else {
                    record.consecutive_failures = record.consecutive_failures.saturating_add(1);
                }
                record.status = new;
                if old != new {
                    transitions.push((record.spec.name.clone(), old, new));
                }
            }

            // Expire overdue entries, then pull a batch whose dependency is
            // healthy again.
            let now = Utc::now();
            let mut index = 0;
            while index < inner.queue.len() {
                let overdue = {
                    let entry = &inner.queue[index];
                    now.signed_duration_since(entry.queued_at)
                        .to_std()
                        .is_ok_and(|waited| waited > entry.max_wait)
                };
                if overdue {
                    tick.expired.push(inner.queue.remove(index));
                } else {
                    index += 1;
                }
            }

            let mut index = 0;
            while index < inner.queue.len() && tick.ready.len() < self.dispatch_batch {
                let available = {
                    let entry = &inner.queue[index];
                    inner
                        .deps
                        .get(&entry.name)
                        .is_some_and(|record| record.status == DependencyStatus::Available)
                };
                if available {
                    tick.ready.push(inner.queue.remove(index));
                } else {
                    index += 1;
                }
            }
        }

        for (name, old, new) in transitions {
            info!(
                dependency = %name,
                from = old.as_str(),
                to = new.as_str(),
                "dependency status changed"
            );
            self.metrics.set_dependency_status(&name, new.as_gauge());
            self.publish(Event::DependencyChanged {
                name,
                status: new.as_str().to_string(),
            });
        }
        for expired in &tick.expired {
            warn!(
                dependency = %expired.name,
                operation = %expired.operation,
                "deferred operation expired before recovery"
            );
        }

        tick
    }

    /// Whether workers may call the dependency. `Degraded` still admits
    /// calls; only `Unavailable` (or an unregistered name) is offline.
    #[must_use]
    pub fn is_available(&self, name: &str) -> bool {
        self.lock()
            .deps
            .get(name)
            .is_some_and(|record| record.status != DependencyStatus::Unavailable)
    }

    /// Record that a worker would have called an offline dependency, and
    /// decide what happens instead.
    #[must_use]
    pub fn handle_unavailable(&self, name: &str, operation: &str, params: Value) -> FallbackDecision {
        let mut inner = self.lock();
        let Some(record) = inner.deps.get(name) else {
            return FallbackDecision::ManualRequired;
        };
        let mode = record.spec.fallback;

        match mode {
            FallbackMode::Queue => {
                let id = inner.next_op_id;
                inner.next_op_id += 1;
                let entry = DeferredOp {
                    id,
                    name: name.to_string(),
                    operation: operation.to_string(),
                    params,
                    queued_at: Utc::now(),
                    max_wait: self.max_wait,
                };
                inner.queue.push(entry);
                drop(inner);
                self.publish(Event::FallbackQueued {
                    name: name.to_string(),
                    operation: operation.to_string(),
                });
                FallbackDecision::Deferred
            }
            FallbackMode::Skip => FallbackDecision::Skipped,
            FallbackMode::Alternate => FallbackDecision::Alternate,
            FallbackMode::Manual => FallbackDecision::ManualRequired,
        }
    }

    /// Operator-facing snapshots, sorted by name.
    #[must_use]
    pub fn snapshots(&self) -> Vec<DependencySnapshot> {
        let inner = self.lock();
        let mut snapshots: Vec<DependencySnapshot> = inner
            .deps
            .values()
            .map(|record| DependencySnapshot {
                name: record.spec.name.clone(),
                status: record.status,
                last_probe: record.last_probe,
                consecutive_failures: record.consecutive_failures,
                queued_ops: inner
                    .queue
                    .iter()
                    .filter(|entry| entry.name == record.spec.name)
                    .count(),
            })
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Shortest registered probe interval; the coordinator's ticker must not
    /// run slower than this.
    #[must_use]
    pub fn min_probe_interval(&self) -> Option<Duration> {
        self.lock()
            .deps
            .values()
            .map(|record| record.spec.probe_interval)
            .min()
    }

    fn publish(&self, event: Event) {
        if let Err(error) = self.events.publish(event) {
            warn!(
                event_id = error.event_id(),
                event_kind = error.event_kind(),
                error = %error,
                "failed to publish event"
            );
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MonitorInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

const fn next_status(
    old: DependencyStatus,
    consecutive_failures: u32,
    healthy: bool,
) -> DependencyStatus {
    if healthy {
        return DependencyStatus::Available;
    }
    // `consecutive_failures` has not been incremented for this probe yet.
    if consecutive_failures + 1 >= UNAVAILABLE_THRESHOLD {
        DependencyStatus::Unavailable
    } else {
        match old {
            DependencyStatus::Unavailable => DependencyStatus::Unavailable,
            _ => DependencyStatus::Degraded,
        }
    }
}

fn probe(kind: DependencyKind, path: &std::path::Path) -> bool {
    match kind {
        DependencyKind::File => path.is_file(),
        DependencyKind::Directory => path.is_dir(),
        DependencyKind::Executable => {
            let Ok(metadata) = std::fs::metadata(path) else {
                return false;
            };
            if !metadata.is_file() {
                return false;
            }
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                metadata.permissions().mode() & 0o111 != 0
            }
            #[cfg(not(unix))]
            {
                true
            }
        }
    }
}
