//! Configuration structures for wasm-host.
//!
//! This module defines configuration options for the execution host:
//! - [`HostOptions`]: Everything an execution host is constructed with
//! - [`EngineConfig`]: Wasmtime engine settings (optimization, fuel)
//! - [`SandboxConfig`]: The WASI environment exposed to the guest

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::HostError;

/// Options for constructing an execution host.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HostOptions {
    /// Prepare the module ahead of time and allow writing AOT artifacts.
    #[serde(default)]
    pub aot_enabled: bool,

    /// Guest-visible arguments, environment, and preopened directories.
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Directory for content-addressed AOT artifacts.
    ///
    /// Only effective when `aot_enabled` is set and the module comes from
    /// bytecode. A cached artifact is reused on later constructions of the
    /// same module.
    #[serde(default)]
    pub aot_cache_dir: Option<PathBuf>,
}

impl HostOptions {
    /// Options with AOT preparation enabled and everything else defaulted.
    pub fn aot() -> Self {
        Self {
            aot_enabled: true,
            ..Default::default()
        }
    }

    /// Replace the sandbox configuration.
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Set the AOT artifact cache directory.
    #[must_use]
    pub fn with_aot_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.aot_cache_dir = Some(dir.into());
        self
    }
}

/// Cranelift optimization level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    /// No optimizations.
    None,
    /// Optimize for speed.
    #[default]
    Speed,
    /// Optimize for speed and code size.
    SpeedAndSize,
}

/// Wasmtime engine configuration.
///
/// AOT artifacts are only loadable by an engine with the same settings, so
/// a host compiling artifacts and a host loading them should share this.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Cranelift optimization level.
    #[serde(default)]
    pub opt_level: OptLevel,

    /// Enable fuel metering.
    ///
    /// When enabled, every invocation is limited to `max_fuel` units and
    /// consumption is reported in the host statistics.
    #[serde(default = "defaults::fuel_metering")]
    pub fuel_metering: bool,

    /// Fuel budget per invocation.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::default(),
            fuel_metering: defaults::fuel_metering(),
            max_fuel: defaults::max_fuel(),
        }
    }
}

/// The environment exposed to the guest through WASI.
///
/// Environment variables and preopens are keyed maps, so inserting a
/// duplicate key replaces the earlier value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SandboxConfig {
    /// Process arguments, in order.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Guest path prefix to host directory.
    #[serde(default)]
    pub preopens: BTreeMap<String, PathBuf>,
}

impl SandboxConfig {
    /// Create an empty sandbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a process argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several process arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set several environment variables.
    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Expose `host_dir` to the guest under `guest_path`.
    #[must_use]
    pub fn preopen(mut self, guest_path: impl Into<String>, host_dir: impl Into<PathBuf>) -> Self {
        self.preopens.insert(guest_path.into(), host_dir.into());
        self
    }

    /// Check that the sandbox can be handed to WASI.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::InvalidConfig`] if:
    /// - an environment key is empty or contains `=` or NUL
    /// - an argument or value contains NUL
    /// - a preopen guest path is empty
    /// - a preopen host path is not an existing directory
    pub fn validate(&self) -> Result<(), HostError> {
        if let Some(arg) = self.args.iter().find(|a| a.contains('\0')) {
            return Err(HostError::invalid_config(format!(
                "argument {arg:?} contains a NUL byte"
            )));
        }

        for (key, value) in &self.env {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(HostError::invalid_config(format!(
                    "invalid environment variable name {key:?}"
                )));
            }
            if value.contains('\0') {
                return Err(HostError::invalid_config(format!(
                    "environment variable {key} contains a NUL byte"
                )));
            }
        }

        for (guest, host) in &self.preopens {
            if guest.is_empty() {
                return Err(HostError::invalid_config(
                    "preopen guest path must not be empty",
                ));
            }
            if !host.is_dir() {
                return Err(HostError::invalid_config(format!(
                    "preopen '{guest}' points at '{}', which is not a directory",
                    host.display()
                )));
            }
        }

        Ok(())
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn fuel_metering() -> bool {
        false
    }

    pub const fn max_fuel() -> u64 {
        10_000_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = HostOptions::default();

        assert!(!options.aot_enabled);
        assert!(options.aot_cache_dir.is_none());
        assert_eq!(options.engine.opt_level, OptLevel::Speed);
        assert!(!options.engine.fuel_metering);
        assert_eq!(options.engine.max_fuel, 10_000_000);
        assert!(options.sandbox.args.is_empty());
    }

    #[test]
    fn test_env_later_duplicate_wins() {
        let sandbox = SandboxConfig::new().env("MODE", "debug").env("MODE", "release");

        assert_eq!(sandbox.env.len(), 1);
        assert_eq!(sandbox.env["MODE"], "release");
    }

    #[test]
    fn test_args_keep_order() {
        let sandbox = SandboxConfig::new().arg("prog").args(["-v", "input.txt"]);
        assert_eq!(sandbox.args, vec!["prog", "-v", "input.txt"]);
    }

    #[test]
    fn test_validate_rejects_bad_env_key() {
        let sandbox = SandboxConfig::new().env("A=B", "c");
        let err = sandbox.validate().unwrap_err();
        assert!(matches!(err, HostError::InvalidConfig { .. }));

        let sandbox = SandboxConfig::new().env("", "c");
        assert!(sandbox.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_preopen_dir() {
        let sandbox = SandboxConfig::new().preopen("/", "/definitely/not/a/real/dir");
        let err = sandbox.validate().unwrap_err();
        assert!(err.is_caller_error());
    }

    #[test]
    fn test_validate_accepts_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = SandboxConfig::new()
            .arg("guest")
            .env("HOME", "/")
            .preopen("/", dir.path());

        assert!(sandbox.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"aot_enabled": true, "engine": {"fuel_metering": true}}"#;
        let options: HostOptions = serde_json::from_str(json).unwrap();

        assert!(options.aot_enabled);
        assert!(options.engine.fuel_metering);
        assert_eq!(options.engine.max_fuel, 10_000_000);
        assert!(options.sandbox.preopens.is_empty());
    }
}
