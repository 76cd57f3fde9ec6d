//! Layered configuration loader: TOML file plus environment overrides.
//!
//! # Design
//! - The file is optional; every field has a default so a bare environment
//!   (`SLUICE__UPLINK__SECRET=…`) is enough to boot.
//! - Environment variables use the `SLUICE__section__field` convention.

use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::model::SluiceConfig;
use crate::validate::validate;

const ENV_PREFIX: &str = "SLUICE";
const DEFAULT_PATH: &str = "sluice.toml";

/// Load configuration from the default file location and the environment.
///
/// # Errors
///
/// Returns an error if the sources cannot be read, deserialised, or fail
/// validation.
pub fn load() -> ConfigResult<SluiceConfig> {
    load_from_path(Path::new(DEFAULT_PATH))
}

/// Load configuration from an explicit file path and the environment.
///
/// # Errors
///
/// Returns an error if the sources cannot be read, deserialised, or fail
/// validation.
pub fn load_from_path(path: &Path) -> ConfigResult<SluiceConfig> {
    let file = File::from(path).format(FileFormat::Toml).required(false);
    let settings = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        )
        .build()
        .map_err(|source| ConfigError::Load { source })?;

    let parsed: SluiceConfig = settings
        .try_deserialize()
        .map_err(|source| ConfigError::Load { source })?;

    validate(&parsed)?;
    info!(
        path = %path.display(),
        instance = %parsed.app.instance_name,
        "configuration loaded"
    );
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io::Write;

    #[test]
    fn loads_file_and_applies_defaults() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sluice.toml");
        let mut file = std::fs::File::create(&path)?;
        writeln!(
            file,
            "[uplink]\nsecret = \"abc123\"\n\n[pipeline]\nqueue_depth = 42\n"
        )?;

        let config = load_from_path(&path)?;
        assert_eq!(config.uplink.secret, "abc123");
        assert_eq!(config.pipeline.queue_depth, 42);
        assert_eq!(config.pipeline.download_workers, 3);
        Ok(())
    }

    #[test]
    fn missing_file_fails_validation_without_secret() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent.toml");
        let result = load_from_path(&missing);
        assert!(result.is_err(), "bare defaults lack an uplink secret");
    }
}
