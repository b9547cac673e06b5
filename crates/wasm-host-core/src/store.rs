//! Guest context and store management.
//!
//! This module provides:
//! - [`HostContext`]: State owned by the store, reachable from WASI imports
//! - [`ExecutionStatistics`]: Cumulative fuel and timing of invocations
//! - [`build_wasi`]: The WASI preview1 context described by a [`SandboxConfig`]

use std::time::Duration;

use tracing::debug;
use uuid::Uuid;
use wasmtime::Store;
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

use crate::WasmEngine;
use wasm_host_common::{HostError, SandboxConfig};

/// State held by the store of an execution host.
///
/// The guest sees exactly the arguments, environment, and directories of the
/// [`SandboxConfig`] it was built from. Standard output and error are
/// inherited from the host process.
pub struct HostContext {
    /// WASI preview1 context.
    pub(crate) wasi: WasiP1Ctx,

    /// Id of the owning execution host, for tracing.
    host_id: Uuid,

    /// Invocation statistics.
    pub statistics: ExecutionStatistics,
}

impl HostContext {
    /// Create a context for host `host_id` around a built WASI context.
    pub fn new(host_id: Uuid, wasi: WasiP1Ctx) -> Self {
        Self {
            wasi,
            host_id,
            statistics: ExecutionStatistics::default(),
        }
    }

    /// Id of the owning execution host.
    pub fn host_id(&self) -> Uuid {
        self.host_id
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("host_id", &self.host_id)
            .field("statistics", &self.statistics)
            .finish_non_exhaustive()
    }
}

/// Cumulative statistics over the invocations of one host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionStatistics {
    /// Whether fuel was metered. When `false`, `fuel_consumed` stays zero.
    pub measured: bool,

    /// Number of guest calls made, including ones that trapped.
    pub invocations: u64,

    /// Fuel consumed across all calls.
    pub fuel_consumed: u64,

    /// Wall-clock time spent inside the guest.
    pub total_duration: Duration,
}

impl ExecutionStatistics {
    /// Record one call.
    pub fn record(&mut self, fuel_consumed: u64, duration: Duration) {
        self.invocations += 1;
        self.fuel_consumed = self.fuel_consumed.saturating_add(fuel_consumed);
        self.total_duration += duration;
    }

    /// Average fuel throughput, if fuel was metered and time has passed.
    #[allow(clippy::cast_precision_loss)]
    pub fn fuel_per_second(&self) -> Option<f64> {
        let secs = self.total_duration.as_secs_f64();
        (self.measured && secs > 0.0).then(|| self.fuel_consumed as f64 / secs)
    }
}

/// Build the WASI preview1 context for a sandbox.
///
/// # Errors
///
/// Returns [`HostError::InvalidConfig`] if a preopened directory cannot be
/// opened.
pub fn build_wasi(sandbox: &SandboxConfig) -> Result<WasiP1Ctx, HostError> {
    let mut builder = WasiCtxBuilder::new();
    builder.inherit_stdout().inherit_stderr().args(sandbox.args.as_slice());

    for (key, value) in &sandbox.env {
        builder.env(key, value);
    }

    for (guest, host) in &sandbox.preopens {
        builder
            .preopened_dir(host, guest, DirPerms::all(), FilePerms::all())
            .map_err(|e| {
                HostError::invalid_config(format!(
                    "cannot preopen '{}' as '{guest}': {e}",
                    host.display()
                ))
            })?;
    }

    debug!(
        args = sandbox.args.len(),
        env = sandbox.env.len(),
        preopens = sandbox.preopens.len(),
        "WASI context built"
    );

    Ok(builder.build_p1())
}

/// Create a store for `context`, filled with fuel when metering is enabled.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn create_store(
    engine: &WasmEngine,
    mut context: HostContext,
) -> Result<Store<HostContext>, HostError> {
    context.statistics.measured = engine.is_metering();
    let mut store = Store::new(engine.inner(), context);

    if engine.is_metering() {
        refuel(&mut store, engine.config().max_fuel)?;
    }

    Ok(store)
}

/// Reset the store's fuel to `amount`.
///
/// # Errors
///
/// Returns an error if fuel metering is disabled on the engine.
pub fn refuel(store: &mut Store<HostContext>, amount: u64) -> Result<(), HostError> {
    store
        .set_fuel(amount)
        .map_err(|e| HostError::invalid_config(format!("Failed to set fuel: {e}")))
}

/// Get remaining fuel from a store.
pub fn get_remaining_fuel(store: &Store<HostContext>) -> Option<u64> {
    store.get_fuel().ok()
}

/// Calculate fuel consumed.
pub fn calculate_fuel_consumed(initial_fuel: u64, store: &Store<HostContext>) -> u64 {
    let remaining = get_remaining_fuel(store).unwrap_or(0);
    initial_fuel.saturating_sub(remaining)
}
