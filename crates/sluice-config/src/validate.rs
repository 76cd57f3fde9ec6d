//! Validation helpers for configuration documents.

use crate::error::{ConfigError, ConfigResult};
use crate::model::SluiceConfig;

/// Validate a loaded configuration document.
///
/// # Errors
///
/// Returns an error naming the first offending section/field when the
/// document violates an operational constraint.
pub fn validate(config: &SluiceConfig) -> ConfigResult<()> {
    if config.app.http_port == 0 {
        return Err(ConfigError::invalid(
            "app",
            "http_port",
            "zero",
            Some(config.app.http_port.to_string()),
        ));
    }

    if config.uplink.secret.trim().is_empty() {
        return Err(ConfigError::invalid("uplink", "secret", "empty", None));
    }
    if config.uplink.secret.contains(['/', '\\']) {
        return Err(ConfigError::invalid(
            "uplink",
            "secret",
            "path_separator",
            None,
        ));
    }
    if config.uplink.max_file_size <= 0 {
        return Err(ConfigError::invalid(
            "uplink",
            "max_file_size",
            "non_positive",
            Some(config.uplink.max_file_size.to_string()),
        ));
    }

    let pipeline = &config.pipeline;
    if pipeline.download_workers == 0 {
        return Err(ConfigError::invalid(
            "pipeline",
            "download_workers",
            "zero",
            None,
        ));
    }
    // The extractor's scratch area is not safe under concurrent use.
    if pipeline.extract_workers != 1 {
        return Err(ConfigError::invalid(
            "pipeline",
            "extract_workers",
            "must_be_one",
            Some(pipeline.extract_workers.to_string()),
        ));
    }
    if pipeline.convert_workers == 0 {
        return Err(ConfigError::invalid(
            "pipeline",
            "convert_workers",
            "zero",
            None,
        ));
    }
    if pipeline.queue_depth == 0 {
        return Err(ConfigError::invalid("pipeline", "queue_depth", "zero", None));
    }
    if pipeline.promote_interval_secs == 0 {
        return Err(ConfigError::invalid(
            "pipeline",
            "promote_interval_secs",
            "zero",
            None,
        ));
    }
    if pipeline.notify_interval_secs == 0 {
        return Err(ConfigError::invalid(
            "pipeline",
            "notify_interval_secs",
            "zero",
            None,
        ));
    }

    if config.tools.probe_interval_secs == 0 {
        return Err(ConfigError::invalid(
            "tools",
            "probe_interval_secs",
            "zero",
            None,
        ));
    }
    if config.tools.fallback_batch == 0 {
        return Err(ConfigError::invalid("tools", "fallback_batch", "zero", None));
    }

    if config.notify.batch_limit == 0 {
        return Err(ConfigError::invalid("notify", "batch_limit", "zero", None));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> SluiceConfig {
        let mut config = SluiceConfig::default();
        config.uplink.secret = "0123456789:token".to_string();
        config
    }

    #[test]
    fn accepts_defaults_with_secret() -> ConfigResult<()> {
        validate(&valid_config())
    }

    #[test]
    fn rejects_missing_secret() {
        let mut config = valid_config();
        config.uplink.secret.clear();
        let err = validate(&config).expect_err("empty secret must be rejected");
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                section: "uplink",
                field: "secret",
                ..
            }
        ));
    }

    #[test]
    fn rejects_widened_extract_pool() {
        let mut config = valid_config();
        config.pipeline.extract_workers = 2;
        let err = validate(&config).expect_err("extract pool must stay serialized");
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                field: "extract_workers",
                ..
            }
        ));
    }

    #[test]
    fn rejects_secret_with_path_separator() {
        let mut config = valid_config();
        config.uplink.secret = "../escape".to_string();
        assert!(validate(&config).is_err());
    }
}
