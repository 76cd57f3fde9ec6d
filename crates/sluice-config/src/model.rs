//! Typed configuration models.
//!
//! # Design
//! - Pure data carriers used by the loader and the application bootstrap.
//! - Durations are stored as integer seconds and surfaced as [`Duration`]
//!   through accessors, keeping the TOML surface flat.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Root configuration document for a Sluice deployment.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SluiceConfig {
    /// Application-level profile (identity, API bind, data directory).
    #[serde(default)]
    pub app: AppProfile,
    /// Uplink contract: bearer secret, staging base, admission policy.
    #[serde(default)]
    pub uplink: UplinkProfile,
    /// Worker pools, timers and retention knobs.
    #[serde(default)]
    pub pipeline: PipelinePolicy,
    /// External tool locations and dependency-monitor knobs.
    #[serde(default)]
    pub tools: ToolsProfile,
    /// Completion notice batching policy.
    #[serde(default)]
    pub notify: NotifyPolicy,
}

/// High-level view of the application profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppProfile {
    /// Friendly identifier displayed in logs and notifications.
    #[serde(default = "default_instance_name")]
    pub instance_name: String,
    /// IP address the operator API should bind to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,
    /// HTTP port the operator API should bind to.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Directory holding the SQLite database and its journal.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Seconds granted to in-flight work when shutting down.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl AppProfile {
    /// Grace period granted to in-flight work at shutdown.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for AppProfile {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            bind_addr: default_bind_addr(),
            http_port: default_http_port(),
            data_dir: default_data_dir(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// Uplink contract and admission policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UplinkProfile {
    /// Bearer secret; doubles as the uplink's on-disk namespace under
    /// `staging_base`. Treated as opaque and never logged.
    #[serde(default)]
    pub secret: String,
    /// Base directory under which the uplink materialises `<secret>/…`.
    #[serde(default = "default_data_dir")]
    pub staging_base: PathBuf,
    /// Optional HTTP endpoint for outbound messages. When unset, deliveries
    /// are logged instead of sent.
    #[serde(default)]
    pub api_base: Option<String>,
    /// Owners allowed to submit tasks. Empty means no admission filter.
    #[serde(default)]
    pub allowed_owners: Vec<i64>,
    /// Largest accepted payload in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: i64,
}

impl Default for UplinkProfile {
    fn default() -> Self {
        Self {
            secret: String::new(),
            staging_base: default_data_dir(),
            api_base: None,
            allowed_owners: Vec::new(),
            max_file_size: default_max_file_size(),
        }
    }
}

/// Worker pool sizing, timers, and retention knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelinePolicy {
    /// Download pool fan-out.
    #[serde(default = "default_download_workers")]
    pub download_workers: usize,
    /// Extract pool width; must stay at one (see `validate`).
    #[serde(default = "default_extract_workers")]
    pub extract_workers: usize,
    /// Convert pool width.
    #[serde(default = "default_convert_workers")]
    pub convert_workers: usize,
    /// Bounded queue depth shared by all pools.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Per-task download deadline in seconds.
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    /// Per-task extract deadline in seconds.
    #[serde(default = "default_extract_timeout_secs")]
    pub extract_timeout_secs: u64,
    /// Per-task convert deadline in seconds.
    #[serde(default = "default_convert_timeout_secs")]
    pub convert_timeout_secs: u64,
    /// Auto-promote ticker period in seconds.
    #[serde(default = "default_promote_interval_secs")]
    pub promote_interval_secs: u64,
    /// Notification ticker period in seconds.
    #[serde(default = "default_notify_interval_secs")]
    pub notify_interval_secs: u64,
    /// Attempts a task may burn before dead-lettering.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Staging files under `temp/` older than this many hours are swept.
    #[serde(default = "default_temp_max_age_hours")]
    pub temp_max_age_hours: u64,
    /// Extract-stage files older than this many days are swept.
    #[serde(default = "default_stage_max_age_days")]
    pub stage_max_age_days: u64,
}

impl PipelinePolicy {
    /// Per-task deadline for the download stage.
    #[must_use]
    pub const fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Per-task deadline for the extract stage.
    #[must_use]
    pub const fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    /// Per-task deadline for the convert stage.
    #[must_use]
    pub const fn convert_timeout(&self) -> Duration {
        Duration::from_secs(self.convert_timeout_secs)
    }

    /// Auto-promote ticker period.
    #[must_use]
    pub const fn promote_interval(&self) -> Duration {
        Duration::from_secs(self.promote_interval_secs)
    }

    /// Notification ticker period.
    #[must_use]
    pub const fn notify_interval(&self) -> Duration {
        Duration::from_secs(self.notify_interval_secs)
    }

    /// Retention window for `temp/` staging files.
    #[must_use]
    pub const fn temp_max_age(&self) -> Duration {
        Duration::from_secs(self.temp_max_age_hours * 3_600)
    }

    /// Retention window for extract-stage files.
    #[must_use]
    pub const fn stage_max_age(&self) -> Duration {
        Duration::from_secs(self.stage_max_age_days * 86_400)
    }
}

impl Default for PipelinePolicy {
    fn default() -> Self {
        Self {
            download_workers: default_download_workers(),
            extract_workers: default_extract_workers(),
            convert_workers: default_convert_workers(),
            queue_depth: default_queue_depth(),
            download_timeout_secs: default_download_timeout_secs(),
            extract_timeout_secs: default_extract_timeout_secs(),
            convert_timeout_secs: default_convert_timeout_secs(),
            promote_interval_secs: default_promote_interval_secs(),
            notify_interval_secs: default_notify_interval_secs(),
            max_retries: default_max_retries(),
            temp_max_age_hours: default_temp_max_age_hours(),
            stage_max_age_days: default_stage_max_age_days(),
        }
    }
}

/// External tool locations and dependency-monitor knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsProfile {
    /// Path to the archive extractor executable.
    #[serde(default = "default_extractor_bin")]
    pub extractor_bin: PathBuf,
    /// Path to the text converter executable.
    #[serde(default = "default_converter_bin")]
    pub converter_bin: PathBuf,
    /// Dependency probe period in seconds.
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    /// Deferred operations replayed per tick once a dependency recovers.
    #[serde(default = "default_fallback_batch")]
    pub fallback_batch: usize,
    /// Deferred operations older than this many seconds are expired.
    #[serde(default = "default_fallback_max_wait_secs")]
    pub fallback_max_wait_secs: u64,
    /// Grace window between SIGTERM and SIGKILL for cancelled tools.
    #[serde(default = "default_term_grace_secs")]
    pub term_grace_secs: u64,
}

impl ToolsProfile {
    /// Dependency probe period.
    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    /// Expiry window for deferred operations.
    #[must_use]
    pub const fn fallback_max_wait(&self) -> Duration {
        Duration::from_secs(self.fallback_max_wait_secs)
    }

    /// Grace window between SIGTERM and SIGKILL.
    #[must_use]
    pub const fn term_grace(&self) -> Duration {
        Duration::from_secs(self.term_grace_secs)
    }
}

impl Default for ToolsProfile {
    fn default() -> Self {
        Self {
            extractor_bin: default_extractor_bin(),
            converter_bin: default_converter_bin(),
            probe_interval_secs: default_probe_interval_secs(),
            fallback_batch: default_fallback_batch(),
            fallback_max_wait_secs: default_fallback_max_wait_secs(),
            term_grace_secs: default_term_grace_secs(),
        }
    }
}

/// Completion notice batching policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyPolicy {
    /// Maximum filenames listed in one batched completion notice.
    #[serde(default = "default_notify_batch_limit")]
    pub batch_limit: usize,
    /// Minimum spacing between messages to distinct channels in seconds.
    #[serde(default = "default_channel_spacing_secs")]
    pub channel_spacing_secs: u64,
    /// Whether terminal failures produce a compact notice to the submitter.
    #[serde(default = "default_announce_failures")]
    pub announce_failures: bool,
}

impl NotifyPolicy {
    /// Minimum spacing between messages to distinct channels.
    #[must_use]
    pub const fn channel_spacing(&self) -> Duration {
        Duration::from_secs(self.channel_spacing_secs)
    }
}

impl Default for NotifyPolicy {
    fn default() -> Self {
        Self {
            batch_limit: default_notify_batch_limit(),
            channel_spacing_secs: default_channel_spacing_secs(),
            announce_failures: default_announce_failures(),
        }
    }
}

fn default_instance_name() -> String {
    defaults::INSTANCE_NAME.to_string()
}

const fn default_bind_addr() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
}

const fn default_http_port() -> u16 {
    defaults::HTTP_PORT
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(defaults::DATA_DIR)
}

const fn default_shutdown_grace_secs() -> u64 {
    defaults::SHUTDOWN_GRACE_SECS
}

const fn default_max_file_size() -> i64 {
    defaults::MAX_FILE_SIZE
}

const fn default_download_workers() -> usize {
    defaults::DOWNLOAD_WORKERS
}

const fn default_extract_workers() -> usize {
    defaults::EXTRACT_WORKERS
}

const fn default_convert_workers() -> usize {
    defaults::CONVERT_WORKERS
}

const fn default_queue_depth() -> usize {
    defaults::QUEUE_DEPTH
}

const fn default_download_timeout_secs() -> u64 {
    defaults::DOWNLOAD_TIMEOUT_SECS
}

const fn default_extract_timeout_secs() -> u64 {
    defaults::EXTRACT_TIMEOUT_SECS
}

const fn default_convert_timeout_secs() -> u64 {
    defaults::CONVERT_TIMEOUT_SECS
}

const fn default_promote_interval_secs() -> u64 {
    defaults::PROMOTE_INTERVAL_SECS
}

const fn default_notify_interval_secs() -> u64 {
    defaults::NOTIFY_INTERVAL_SECS
}

const fn default_max_retries() -> u32 {
    defaults::MAX_RETRIES
}

const fn default_temp_max_age_hours() -> u64 {
    defaults::TEMP_MAX_AGE_HOURS
}

const fn default_stage_max_age_days() -> u64 {
    defaults::STAGE_MAX_AGE_DAYS
}

fn default_extractor_bin() -> PathBuf {
    PathBuf::from("/usr/local/bin/sluice-extract")
}

fn default_converter_bin() -> PathBuf {
    PathBuf::from("/usr/local/bin/sluice-convert")
}

const fn default_probe_interval_secs() -> u64 {
    defaults::PROBE_INTERVAL_SECS
}

const fn default_fallback_batch() -> usize {
    defaults::FALLBACK_BATCH
}

const fn default_fallback_max_wait_secs() -> u64 {
    defaults::FALLBACK_MAX_WAIT_SECS
}

const fn default_term_grace_secs() -> u64 {
    defaults::TERM_GRACE_SECS
}

const fn default_notify_batch_limit() -> usize {
    defaults::NOTIFY_BATCH_LIMIT
}

const fn default_channel_spacing_secs() -> u64 {
    defaults::CHANNEL_SPACING_SECS
}

const fn default_announce_failures() -> bool {
    true
}
