//! Wasmtime engine configuration and creation.
//!
//! The [`WasmEngine`] wraps the Wasmtime [`Engine`] an execution host
//! compiles and runs its module with. Its settings decide which AOT
//! artifacts it can load: an artifact is only accepted by an engine built
//! from an equal [`EngineConfig`].

use std::sync::Arc;

use tracing::info;
use wasmtime::{Config, Engine};

use wasm_host_common::{EngineConfig, HostError, OptLevel};

/// WebAssembly engine wrapper.
///
/// # Configuration
///
/// The engine is configured with:
/// - **Cranelift**: native code generation at the configured optimization level
/// - **Fuel Metering** (optional): deterministic per-call CPU budget
///
/// # Example
///
/// ```ignore
/// use wasm_host_common::EngineConfig;
/// use wasm_host_core::WasmEngine;
///
/// let engine = WasmEngine::new(&EngineConfig::default())?;
/// ```
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
}

impl WasmEngine {
    /// Create a new WebAssembly engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::InvalidConfig`] if Wasmtime rejects the
    /// configuration.
    pub fn new(config: &EngineConfig) -> Result<Self, HostError> {
        let mut wasmtime_config = Config::new();

        wasmtime_config.cranelift_opt_level(match config.opt_level {
            OptLevel::None => wasmtime::OptLevel::None,
            OptLevel::Speed => wasmtime::OptLevel::Speed,
            OptLevel::SpeedAndSize => wasmtime::OptLevel::SpeedAndSize,
        });

        wasmtime_config.consume_fuel(config.fuel_metering);

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            HostError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!(
            opt_level = ?config.opt_level,
            fuel_metering = config.fuel_metering,
            "Wasmtime engine initialized"
        );

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
        })
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Check if fuel metering is enabled.
    pub fn is_metering(&self) -> bool {
        self.config.fuel_metering
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("opt_level", &self.config.opt_level)
            .field("fuel_metering", &self.config.fuel_metering)
            .finish_non_exhaustive()
    }
}
