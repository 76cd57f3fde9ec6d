//! Default values for configuration records.
//!
//! # Design
//! - Centralize stage caps and timers so code and documentation stay
//!   consistent.
//! - Keep time-based defaults explicit for auditability.

/// Default HTTP port for the operator API.
pub(crate) const HTTP_PORT: u16 = 8098;
/// Default instance name used in logs and notifications.
pub(crate) const INSTANCE_NAME: &str = "sluice";
/// Default SQLite database filename under the data directory.
pub(crate) const DATA_DIR: &str = "./data";
/// Default grace period for draining in-flight work at shutdown, in seconds.
pub(crate) const SHUTDOWN_GRACE_SECS: u64 = 30;

/// Largest accepted payload in bytes (4 GiB).
pub(crate) const MAX_FILE_SIZE: i64 = 4 * 1024 * 1024 * 1024;

/// Download pool fan-out.
pub(crate) const DOWNLOAD_WORKERS: usize = 3;
/// Extract pool width. The external extractor corrupts its scratch area under
/// concurrent use, so this must stay at one.
pub(crate) const EXTRACT_WORKERS: usize = 1;
/// Convert pool width.
pub(crate) const CONVERT_WORKERS: usize = 2;
/// Bounded queue depth shared by all pools.
pub(crate) const QUEUE_DEPTH: usize = 100;
/// Per-task download deadline, in seconds (10 minutes).
pub(crate) const DOWNLOAD_TIMEOUT_SECS: u64 = 600;
/// Per-task extract deadline, in seconds (30 minutes).
pub(crate) const EXTRACT_TIMEOUT_SECS: u64 = 1_800;
/// Per-task convert deadline, in seconds (30 minutes).
pub(crate) const CONVERT_TIMEOUT_SECS: u64 = 1_800;
/// Auto-promote ticker period, in seconds.
pub(crate) const PROMOTE_INTERVAL_SECS: u64 = 15;
/// Notification dispatcher ticker period, in seconds.
pub(crate) const NOTIFY_INTERVAL_SECS: u64 = 5;
/// Attempts a task may burn before it is dead-lettered.
pub(crate) const MAX_RETRIES: u32 = 3;
/// Staging files under `temp/` older than this are swept, in hours.
pub(crate) const TEMP_MAX_AGE_HOURS: u64 = 24;
/// Extract-stage files older than this are swept, in days.
pub(crate) const STAGE_MAX_AGE_DAYS: u64 = 7;

/// Dependency probe period, in seconds.
pub(crate) const PROBE_INTERVAL_SECS: u64 = 30;
/// Deferred operations replayed per monitor tick once a dependency recovers.
pub(crate) const FALLBACK_BATCH: usize = 10;
/// Deferred operations older than this are expired, in seconds.
pub(crate) const FALLBACK_MAX_WAIT_SECS: u64 = 3_600;
/// Grace window between SIGTERM and SIGKILL for cancelled tools, in seconds.
pub(crate) const TERM_GRACE_SECS: u64 = 5;

/// Maximum filenames listed in one batched completion notice.
pub(crate) const NOTIFY_BATCH_LIMIT: usize = 10;
/// Minimum spacing between messages to distinct channels, in seconds.
pub(crate) const CHANNEL_SPACING_SECS: u64 = 3;
