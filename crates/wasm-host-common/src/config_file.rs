//! Configuration file structures for wasm-host.
//!
//! A [`ConfigFile`] is the TOML form of [`HostOptions`]:
//! - `[engine]`: Wasmtime engine settings
//! - `[host]`: AOT preparation and artifact cache
//! - `[sandbox]`: guest arguments, environment, and preopens

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{EngineConfig, HostOptions, SandboxConfig};

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [engine]
/// opt_level = "speed"
/// fuel_metering = true
/// max_fuel = 5_000_000
///
/// [host]
/// aot_enabled = true
/// aot_cache_dir = "/var/cache/wasm-host"
///
/// [sandbox]
/// args = ["app.wasm", "--verbose"]
///
/// [sandbox.env]
/// RUST_LOG = "info"
///
/// [sandbox.preopens]
/// "/" = "./data"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Host behaviour.
    #[serde(default)]
    pub host: HostSection,

    /// Guest sandbox.
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

/// The `[host]` table.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HostSection {
    /// Enable AOT preparation and artifact output.
    #[serde(default)]
    pub aot_enabled: bool,

    /// Directory for cached AOT artifacts.
    #[serde(default)]
    pub aot_cache_dir: Option<PathBuf>,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigFileError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        debug!(path = %path.display(), "Loading host configuration");
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }

    /// Convert into the options an execution host is constructed with.
    pub fn into_host_options(self) -> HostOptions {
        HostOptions {
            aot_enabled: self.host.aot_enabled,
            sandbox: self.sandbox,
            engine: self.engine,
            aot_cache_dir: self.host.aot_cache_dir,
        }
    }
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OptLevel;

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();

        assert!(!config.host.aot_enabled);
        assert!(config.host.aot_cache_dir.is_none());
        assert!(config.sandbox.args.is_empty());
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r"
            [host]
            aot_enabled = true
        ";

        let config = ConfigFile::from_toml(toml).unwrap();

        assert!(config.host.aot_enabled);
        // Defaults applied
        assert_eq!(config.engine.opt_level, OptLevel::Speed);
        assert!(!config.engine.fuel_metering);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [engine]
            opt_level = "speed_and_size"
            fuel_metering = true
            max_fuel = 5_000_000

            [host]
            aot_enabled = true
            aot_cache_dir = "/tmp/wasm-host-cache"

            [sandbox]
            args = ["integers.wasm", "--verbose"]

            [sandbox.env]
            MODE = "test"
            LANG = "C"

            [sandbox.preopens]
            "/" = "/srv/data"
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.engine.opt_level, OptLevel::SpeedAndSize);
        assert!(config.engine.fuel_metering);
        assert_eq!(config.engine.max_fuel, 5_000_000);
        assert_eq!(
            config.host.aot_cache_dir,
            Some(PathBuf::from("/tmp/wasm-host-cache"))
        );
        assert_eq!(config.sandbox.args, vec!["integers.wasm", "--verbose"]);
        assert_eq!(config.sandbox.env["MODE"], "test");
        assert_eq!(config.sandbox.preopens["/"], PathBuf::from("/srv/data"));

        let options = config.into_host_options();
        assert!(options.aot_enabled);
        assert_eq!(options.sandbox.env.len(), 2);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");
        std::fs::write(&path, "[sandbox]\nargs = [\"a\"]\n").unwrap();

        let config = ConfigFile::from_file(&path).unwrap();
        assert_eq!(config.sandbox.args, vec!["a"]);
    }

    #[test]
    fn test_from_missing_file() {
        let result = ConfigFile::from_file("/no/such/host.toml");
        assert!(matches!(result, Err(ConfigFileError::Io { .. })));
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        let result = ConfigFile::from_toml(invalid);
        assert!(matches!(result, Err(ConfigFileError::Parse { .. })));
    }
}
