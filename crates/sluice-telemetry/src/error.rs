//! Error types for telemetry initialisation and metric registration.

use thiserror::Error;

/// Result alias for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Errors produced while wiring logging or metrics.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A Prometheus collector could not be created or registered.
    #[error("metric registration failed")]
    Registry {
        /// Collector that failed to register.
        collector: &'static str,
        /// Underlying Prometheus error.
        source: prometheus::Error,
    },
    /// Metric samples could not be encoded for the exposition endpoint.
    #[error("metric encoding failed")]
    Encode {
        /// Underlying Prometheus error.
        source: prometheus::Error,
    },
    /// The global tracing subscriber was already installed.
    #[error("tracing subscriber installation failed")]
    Subscriber {
        /// Underlying subscriber error rendered as text.
        detail: String,
    },
}

impl TelemetryError {
    pub(crate) const fn registry(collector: &'static str, source: prometheus::Error) -> Self {
        Self::Registry { collector, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_error_messages_are_constant() {
        let err = TelemetryError::Subscriber {
            detail: "already set".to_string(),
        };
        assert_eq!(err.to_string(), "tracing subscriber installation failed");
    }
}
