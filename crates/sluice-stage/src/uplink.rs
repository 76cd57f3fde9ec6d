//! Chat-platform uplink contract and the default adapter.
//!
//! The uplink stages inbound payloads under `documents/` before this system
//! ever sees them, so locating a file is a namespace lookup rather than a
//! transfer. Outbound messages go over HTTP when an endpoint is configured.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::error::{StageError, StageResult};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Contract for the chat-platform uplink.
#[async_trait]
pub trait Uplink: Send + Sync {
    /// Resolve an uplink file handle to the staged payload's on-disk path.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is malformed or no staged payload
    /// exists for it.
    async fn locate_file(&self, handle: &str) -> StageResult<PathBuf>;

    /// Deliver a message to a reply channel.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails; callers retry on their own
    /// schedule.
    async fn send_message(&self, channel_id: i64, text: &str) -> StageResult<()>;
}

/// Default adapter: local staging lookup plus HTTP message delivery.
#[derive(Clone)]
pub struct LocalUplink {
    documents_dir: PathBuf,
    api_base: Option<String>,
    client: reqwest::Client,
}

impl LocalUplink {
    /// Build an adapter over the resolved `documents/` inbox.
    ///
    /// When `api_base` is `None`, message deliveries are logged and dropped;
    /// useful for development without platform credentials.
    #[must_use]
    pub fn new(documents_dir: PathBuf, api_base: Option<String>) -> Self {
        Self {
            documents_dir,
            api_base,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Uplink for LocalUplink {
    async fn locate_file(&self, handle: &str) -> StageResult<PathBuf> {
        if handle.is_empty() || handle.contains(['/', '\\']) || handle.starts_with('.') {
            return Err(StageError::InvalidHandle {
                handle: handle.to_string(),
            });
        }

        let candidate = self.documents_dir.join(handle);
        if candidate.is_file() {
            Ok(candidate)
        } else {
            Err(StageError::MissingPayload {
                handle: handle.to_string(),
            })
        }
    }

    async fn send_message(&self, channel_id: i64, text: &str) -> StageResult<()> {
        let Some(base) = self.api_base.as_deref() else {
            info!(channel_id, "uplink endpoint not configured; dropping message");
            return Ok(());
        };

        let url = format!("{}/sendMessage", base.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .timeout(SEND_TIMEOUT)
            .json(&json!({ "chat_id": channel_id, "text": text }))
            .send()
            .await
            .map_err(|source| StageError::Http {
                operation: "send_message",
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(StageError::HttpStatus {
                operation: "send_message",
                url,
                status: status.as_u16(),
            })
        }
    }
}
