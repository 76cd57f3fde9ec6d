//! # Design
//!
//! - Centralize application-level errors for bootstrap and orchestration.
//! - Keep error messages constant while carrying context fields for
//!   debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for application operations.
pub(crate) type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub(crate) enum AppError {
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: sluice_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: sluice_telemetry::TelemetryError,
    },
    /// Task store operations failed.
    #[error("task store operation failed")]
    Store {
        /// Operation identifier.
        operation: &'static str,
        /// Source store error.
        source: sluice_tasks::TaskStoreError,
    },
    /// Staging operations failed.
    #[error("staging operation failed")]
    Placement {
        /// Operation identifier.
        operation: &'static str,
        /// Source staging error.
        source: sluice_placement::PlacementError,
    },
    /// Engine operations failed.
    #[error("engine operation failed")]
    Engine {
        /// Operation identifier.
        operation: &'static str,
        /// Source engine error.
        source: sluice_engine::EngineError,
    },
    /// API server operations failed.
    #[error("api server operation failed")]
    ApiServer {
        /// Operation identifier.
        operation: &'static str,
        /// Source API server error.
        source: sluice_api::ApiServerError,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Optional path involved in the failure.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: sluice_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: sluice_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn store(
        operation: &'static str,
        source: sluice_tasks::TaskStoreError,
    ) -> Self {
        Self::Store { operation, source }
    }

    pub(crate) const fn placement(
        operation: &'static str,
        source: sluice_placement::PlacementError,
    ) -> Self {
        Self::Placement { operation, source }
    }

    pub(crate) const fn engine(
        operation: &'static str,
        source: sluice_engine::EngineError,
    ) -> Self {
        Self::Engine { operation, source }
    }

    pub(crate) const fn api_server(
        operation: &'static str,
        source: sluice_api::ApiServerError,
    ) -> Self {
        Self::ApiServer { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_error_helpers_build_variants() {
        let config = AppError::config(
            "load",
            sluice_config::ConfigError::InvalidField {
                section: "uplink",
                field: "secret",
                reason: "empty",
                value: None,
            },
        );
        assert!(matches!(config, AppError::Config { .. }));
        assert_eq!(config.to_string(), "configuration operation failed");

        let api = AppError::api_server(
            "serve",
            sluice_api::ApiServerError::Serve {
                source: io::Error::other("bind"),
            },
        );
        assert!(matches!(api, AppError::ApiServer { .. }));
    }
}
