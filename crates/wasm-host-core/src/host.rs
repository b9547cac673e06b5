//! The execution host: one loaded, instantiated guest module.
//!
//! [`ExecutionHost`] owns the engine, the compiled module, and the store the
//! guest instance lives in. Its lifecycle:
//!
//! 1. Claim the process-wide engine slot
//! 2. Load the module (bytecode, AOT artifact, or cache)
//! 3. Instantiate it against the WASI linker and run `_initialize` if exported
//! 4. Serve `invoke`, `start`, and `compile` until dropped

use std::path::Path;
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use wasmtime::{Func, Instance, Store, Trap, Val};
use wasmtime_wasi::I32Exit;

use crate::WasmEngine;
use crate::aot::{ArtifactCache, ensure_artifact_path, write_artifact};
use crate::invoke::{
    DomainValue, check_procedure_signature, check_signature, describe_func_type, marshal_args,
    unmarshal,
};
use crate::linker::create_linker;
use crate::module::{CompiledModule, ModuleSource};
use crate::slot::EngineSlot;
use crate::store::{
    ExecutionStatistics, HostContext, build_wasi, calculate_fuel_consumed, create_store, refuel,
};
use wasm_host_common::{HostError, HostOptions, NumericDomain, SandboxConfig};

/// Export called once after instantiation, when present.
const REACTOR_INIT: &str = "_initialize";

/// Export called by [`ExecutionHost::start`].
const COMMAND_ENTRY: &str = "_start";

/// A loaded guest module ready for invocation.
///
/// Only one host may be alive per process; constructing a second one fails
/// with [`HostError::SingletonViolation`] until the first is dropped.
///
/// # Example
///
/// ```ignore
/// use wasm_host_common::{HostOptions, NumericDomain};
/// use wasm_host_core::{ExecutionHost, ModuleSource};
///
/// let mut host = ExecutionHost::new(
///     ModuleSource::from_path("integers.wasm"),
///     HostOptions::aot(),
/// )?;
/// let lcm = host.invoke("lcm_u32", NumericDomain::UnsignedInt32, &[2_147_483_647, 2])?;
/// host.compile("integers.wasm.so")?;
/// ```
pub struct ExecutionHost {
    id: Uuid,
    engine: WasmEngine,
    module: CompiledModule,
    store: Store<HostContext>,
    instance: Instance,
    source: ModuleSource,
    options: HostOptions,
    // Declared last so the slot is released after everything above is gone.
    _slot: EngineSlot,
}

impl ExecutionHost {
    /// Load and instantiate `source`.
    ///
    /// # Errors
    ///
    /// - [`HostError::SingletonViolation`] if another host is alive
    /// - [`HostError::InvalidConfig`] if the sandbox or engine settings are invalid
    /// - [`HostError::Load`] if the module cannot be read, compiled,
    ///   deserialized, instantiated, or initialized
    /// - [`HostError::Io`] if writing to the AOT cache fails
    #[instrument(skip_all, fields(source = %source, aot = options.aot_enabled))]
    pub fn new(source: ModuleSource, options: HostOptions) -> Result<Self, HostError> {
        let start = Instant::now();
        let id = Uuid::new_v4();
        let slot = EngineSlot::acquire(id)?;

        options.sandbox.validate()?;

        let engine = WasmEngine::new(&options.engine)?;

        let cache = options
            .aot_cache_dir
            .as_ref()
            .filter(|_| options.aot_enabled)
            .map(ArtifactCache::new);

        let module = CompiledModule::from_source(engine.inner(), &source, cache.as_ref())?;

        let linker = create_linker(&engine)?;
        let context = HostContext::new(id, build_wasi(&options.sandbox)?);
        let mut store = create_store(&engine, context)?;

        let instance = linker
            .instantiate(&mut store, module.inner())
            .map_err(|e| HostError::load_failed(format!("Instantiation failed: {e:#}")))?;

        let mut host = Self {
            id,
            engine,
            module,
            store,
            instance,
            source,
            options,
            _slot: slot,
        };

        host.initialize()?;

        info!(
            host_id = %host.id,
            content_hash = %host.module.content_hash(),
            precompiled = host.module.is_precompiled(),
            exports = host.module.function_exports().len(),
            duration_ms = start.elapsed().as_millis(),
            "Execution host ready"
        );

        Ok(host)
    }

    /// Run the reactor initializer if the module exports one.
    fn initialize(&mut self) -> Result<(), HostError> {
        if !self.module.exports_function(REACTOR_INIT) {
            return Ok(());
        }

        debug!("Running reactor initializer");

        let init = self
            .instance
            .get_typed_func::<(), ()>(&mut self.store, REACTOR_INIT)
            .map_err(|e| {
                HostError::load_failed(format!("'{REACTOR_INIT}' has the wrong type: {e}"))
            })?;

        self.refuel()?;
        init.call(&mut self.store, ())
            .map_err(|e| HostError::load_failed(format!("'{REACTOR_INIT}' trapped: {e:#}")))
    }

    /// Write the loaded module to `output` as a native artifact.
    ///
    /// The artifact is loadable with [`ModuleSource::PrecompiledArtifactPath`]
    /// by a host with the same engine configuration. Any file at `output` is
    /// replaced atomically.
    ///
    /// # Errors
    ///
    /// - [`HostError::Compile`] if AOT is disabled or serialization fails
    /// - [`HostError::InvalidArtifactPath`] if `output` does not end with `.so`
    /// - [`HostError::Io`] if the artifact cannot be written
    #[instrument(
        skip(self, output),
        fields(host_id = %self.id, output = %output.as_ref().display())
    )]
    pub fn compile(&self, output: impl AsRef<Path>) -> Result<bool, HostError> {
        let output = output.as_ref();

        self.ensure_aot()?;
        ensure_artifact_path(output)?;

        let artifact = self.native_binary()?;
        write_artifact(output, &artifact)?;

        info!(bytes = artifact.len(), "AOT artifact written");
        Ok(true)
    }

    /// The loaded module as native artifact bytes, as [`ExecutionHost::compile`]
    /// would write them.
    ///
    /// The bytes load with [`ModuleSource::PrecompiledArtifactBytes`] under the
    /// same engine configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Compile`] if AOT is disabled or serialization fails.
    pub fn native_binary(&self) -> Result<Vec<u8>, HostError> {
        self.ensure_aot()?;
        self.module.serialize()
    }

    fn ensure_aot(&self) -> Result<(), HostError> {
        if self.options.aot_enabled {
            Ok(())
        } else {
            Err(HostError::compile_failed(
                "AOT compilation is disabled for this host",
            ))
        }
    }

    /// Call export `name` with `args` interpreted in `domain`.
    ///
    /// Each argument is range checked; the result is read back in the same
    /// domain, so guest wraparound is returned as-is.
    ///
    /// # Errors
    ///
    /// - [`HostError::ExportNotFound`] if `name` is not an exported function
    /// - [`HostError::TypeMismatch`] if its signature is not `(t, ..) -> t`
    ///   for the domain's Wasm type `t` and `args.len()` parameters
    /// - [`HostError::ArgumentOutOfRange`] for an argument outside `domain`
    /// - [`HostError::Trap`] if the guest traps or runs out of fuel
    #[instrument(
        skip(self, args),
        fields(host_id = %self.id, domain = %domain, argc = args.len())
    )]
    pub fn invoke(
        &mut self,
        name: &str,
        domain: NumericDomain,
        args: &[i128],
    ) -> Result<i128, HostError> {
        let func = self.resolve(name, domain, args.len())?;
        let params = marshal_args(domain, args)?;
        let result = self.call_value(name, func, &params)?;

        unmarshal(domain, &result).ok_or_else(|| result_mismatch(name, domain, &result))
    }

    /// Call export `name`, which returns nothing, with `args` interpreted
    /// in `domain`. Used for exports called for their effect on guest state.
    ///
    /// # Errors
    ///
    /// - [`HostError::ExportNotFound`] if `name` is not an exported function
    /// - [`HostError::TypeMismatch`] if its signature is not `(t, ..) -> ()`
    ///   for the domain's Wasm type `t` and `args.len()` parameters
    /// - [`HostError::ArgumentOutOfRange`] for an argument outside `domain`
    /// - [`HostError::Trap`] if the guest traps or runs out of fuel
    #[instrument(
        skip(self, args),
        fields(host_id = %self.id, domain = %domain, argc = args.len())
    )]
    pub fn run(
        &mut self,
        name: &str,
        domain: NumericDomain,
        args: &[i128],
    ) -> Result<(), HostError> {
        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| HostError::export_not_found(name))?;
        check_procedure_signature(name, &func.ty(&self.store), domain, args.len())?;

        let params = marshal_args(domain, args)?;
        self.call(name, func, &params, &mut [])
    }

    /// Call export `name` with arguments and result of a Rust integer type.
    ///
    /// The domain follows from `T`, so no argument can be out of range.
    ///
    /// # Errors
    ///
    /// Same as [`ExecutionHost::invoke`], except `ArgumentOutOfRange`.
    pub fn invoke_as<T: DomainValue>(&mut self, name: &str, args: &[T]) -> Result<T, HostError> {
        let func = self.resolve(name, T::DOMAIN, args.len())?;
        let params: Vec<Val> = args.iter().map(|arg| arg.into_val()).collect();
        let result = self.call_value(name, func, &params)?;

        T::from_val(&result).ok_or_else(|| result_mismatch(name, T::DOMAIN, &result))
    }

    /// Run the module as a WASI command by calling `_start`.
    ///
    /// Returns the exit code passed to `proc_exit`, or 0 if `_start`
    /// returns normally.
    ///
    /// # Errors
    ///
    /// - [`HostError::ExportNotFound`] if `_start` is not exported
    /// - [`HostError::TypeMismatch`] if `_start` is not `() -> ()`
    /// - [`HostError::Trap`] if the guest traps
    #[instrument(skip(self), fields(host_id = %self.id))]
    pub fn start(&mut self) -> Result<i32, HostError> {
        let func = self
            .instance
            .get_func(&mut self.store, COMMAND_ENTRY)
            .ok_or_else(|| HostError::export_not_found(COMMAND_ENTRY))?;

        let entry = func.typed::<(), ()>(&self.store).map_err(|_| HostError::TypeMismatch {
            name: COMMAND_ENTRY.to_string(),
            expected: "() -> ()".to_string(),
            actual: describe_func_type(&func.ty(&self.store)),
        })?;

        let initial_fuel = self.refuel()?;
        let start = Instant::now();
        let outcome = entry.call(&mut self.store, ());
        self.record(initial_fuel, start);

        match outcome {
            Ok(()) => Ok(0),
            Err(e) => match e.downcast_ref::<I32Exit>() {
                Some(I32Exit(code)) => {
                    info!(exit_code = code, "Guest exited");
                    Ok(*code)
                }
                None => Err(trap_error(COMMAND_ENTRY, &e)),
            },
        }
    }

    /// Names of the module's exported functions, in module order.
    pub fn exported_functions(&self) -> Vec<String> {
        self.module.function_exports()
    }

    /// Cumulative statistics of the calls made through this host.
    pub fn statistics(&self) -> ExecutionStatistics {
        self.store.data().statistics.clone()
    }

    /// Unique id of this host; also the engine slot owner.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether this host was constructed with AOT enabled.
    pub fn aot_enabled(&self) -> bool {
        self.options.aot_enabled
    }

    /// The source the module was loaded from.
    pub fn source(&self) -> &ModuleSource {
        &self.source
    }

    /// The sandbox the guest runs in.
    pub fn sandbox(&self) -> &SandboxConfig {
        &self.options.sandbox
    }

    /// BLAKE3 hash identifying the loaded module.
    pub fn content_hash(&self) -> &str {
        self.module.content_hash()
    }

    /// Look up export `name` and check it against the requested call shape.
    fn resolve(
        &mut self,
        name: &str,
        domain: NumericDomain,
        arity: usize,
    ) -> Result<Func, HostError> {
        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| HostError::export_not_found(name))?;

        check_signature(name, &func.ty(&self.store), domain, arity)?;
        Ok(func)
    }

    /// Call a checked function and return its single result.
    fn call_value(&mut self, name: &str, func: Func, params: &[Val]) -> Result<Val, HostError> {
        let mut results = [Val::I32(0)];
        self.call(name, func, params, &mut results)?;

        let [result] = results;
        Ok(result)
    }

    /// Call a checked function on a fresh fuel budget, recording statistics.
    fn call(
        &mut self,
        name: &str,
        func: Func,
        params: &[Val],
        results: &mut [Val],
    ) -> Result<(), HostError> {
        let initial_fuel = self.refuel()?;
        let start = Instant::now();

        let outcome = func.call(&mut self.store, params, results);
        self.record(initial_fuel, start);

        outcome.map_err(|e| trap_error(name, &e))?;

        debug!(export = name, "Invocation completed");
        Ok(())
    }

    /// Give the store a full fuel budget. Returns the budget, 0 when unmetered.
    fn refuel(&mut self) -> Result<u64, HostError> {
        if !self.engine.is_metering() {
            return Ok(0);
        }
        let budget = self.engine.config().max_fuel;
        refuel(&mut self.store, budget)?;
        Ok(budget)
    }

    fn record(&mut self, initial_fuel: u64, start: Instant) {
        let consumed = if self.engine.is_metering() {
            calculate_fuel_consumed(initial_fuel, &self.store)
        } else {
            0
        };
        self.store
            .data_mut()
            .statistics
            .record(consumed, start.elapsed());
    }
}

/// The result did not decode even though the signature was checked.
fn result_mismatch(name: &str, domain: NumericDomain, result: &Val) -> HostError {
    warn!(export = name, "Result type differs from the checked signature");
    HostError::TypeMismatch {
        name: name.to_string(),
        expected: domain.wasm_type().to_string(),
        actual: format!("{result:?}"),
    }
}

/// Convert a failed guest call into a trap error.
fn trap_error(export: &str, error: &wasmtime::Error) -> HostError {
    let code = error.downcast_ref::<Trap>().map(|trap| format!("{trap:?}"));
    let message = format!("{error:#}");

    if matches!(error.downcast_ref::<Trap>(), Some(Trap::OutOfFuel)) {
        warn!(export, "Execution terminated: fuel exhausted");
    } else {
        error!(export, trap_message = %message, "Execution trapped");
    }

    HostError::trap(message, code)
}

impl std::fmt::Debug for ExecutionHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHost")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("aot_enabled", &self.options.aot_enabled)
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{HOST_LOCK, integers_wasm};
    use wasm_host_common::EngineConfig;

    fn host(options: HostOptions) -> ExecutionHost {
        ExecutionHost::new(ModuleSource::RawBytes(integers_wasm()), options).unwrap()
    }

    #[test]
    fn test_host_releases_slot_on_drop() {
        let _serial = HOST_LOCK.lock();

        let first = host(HostOptions::default());
        assert!(EngineSlot::is_held());

        let err =
            ExecutionHost::new(ModuleSource::RawBytes(integers_wasm()), HostOptions::default())
                .unwrap_err();
        match err {
            HostError::SingletonViolation { owner } => assert_eq!(owner, first.id().to_string()),
            other => panic!("expected SingletonViolation, got {other:?}"),
        }

        drop(first);
        assert!(!EngineSlot::is_held());
    }

    #[test]
    fn test_failed_construction_releases_slot() {
        let _serial = HOST_LOCK.lock();

        let err = ExecutionHost::new(ModuleSource::RawBytes(vec![]), HostOptions::default())
            .unwrap_err();
        assert!(matches!(err, HostError::Load { .. }));
        assert!(!EngineSlot::is_held());
    }

    #[test]
    fn test_reactor_initializer_runs() {
        let _serial = HOST_LOCK.lock();
        let mut host = host(HostOptions::default());

        let initialized = host
            .invoke("is_initialized", NumericDomain::SignedInt32, &[])
            .unwrap();
        assert_eq!(initialized, 1);
    }

    #[test]
    fn test_invoke_and_invoke_as_agree() {
        let _serial = HOST_LOCK.lock();
        let mut host = host(HostOptions::default());

        let wide = host
            .invoke("lcm_u32", NumericDomain::UnsignedInt32, &[4_294_967_295, 2])
            .unwrap();
        let typed = host.invoke_as::<u32>("lcm_u32", &[u32::MAX, 2]).unwrap();

        assert_eq!(wide, 4_294_967_294);
        assert_eq!(i128::from(typed), wide);
    }

    #[test]
    fn test_start_without_entry() {
        let _serial = HOST_LOCK.lock();
        let mut host = host(HostOptions::default());

        let err = host.start().unwrap_err();
        assert!(matches!(err, HostError::ExportNotFound { ref name } if name == "_start"));
    }

    #[test]
    fn test_statistics_count_calls() {
        let _serial = HOST_LOCK.lock();
        let mut host = host(HostOptions {
            engine: EngineConfig {
                fuel_metering: true,
                ..Default::default()
            },
            ..Default::default()
        });

        host.invoke("lcm_s32", NumericDomain::SignedInt32, &[123, 1011]).unwrap();
        let _ = host.invoke("div_s32", NumericDomain::SignedInt32, &[1, 0]);

        let stats = host.statistics();
        assert!(stats.measured);
        assert_eq!(stats.invocations, 2);
        assert!(stats.fuel_consumed > 0);
    }

    #[test]
    fn test_compile_requires_aot() {
        let _serial = HOST_LOCK.lock();
        let host = host(HostOptions::default());
        let dir = tempfile::tempdir().unwrap();

        let err = host.compile(dir.path().join("out.so")).unwrap_err();
        assert!(matches!(err, HostError::Compile { .. }));
        assert!(!dir.path().join("out.so").exists());
    }

    #[test]
    fn test_native_binary_requires_aot() {
        let _serial = HOST_LOCK.lock();
        let host = host(HostOptions::default());

        let err = host.native_binary().unwrap_err();
        assert!(matches!(err, HostError::Compile { .. }));
    }

    #[test]
    fn test_native_binary_matches_compile_output() {
        let _serial = HOST_LOCK.lock();
        let host = host(HostOptions::aot());
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("integers.wasm.so");

        let binary = host.native_binary().unwrap();
        assert!(host.compile(&output).unwrap());
        assert_eq!(std::fs::read(&output).unwrap(), binary);
    }

    #[test]
    fn test_run_updates_guest_state() {
        let _serial = HOST_LOCK.lock();
        let mut host = host(HostOptions::default());

        host.run("store_s32", NumericDomain::SignedInt32, &[-42]).unwrap();
        let stored = host.invoke("stored", NumericDomain::SignedInt32, &[]).unwrap();
        assert_eq!(stored, -42);
        assert_eq!(host.statistics().invocations, 2);
    }

    #[test]
    fn test_run_rejects_bad_calls() {
        let _serial = HOST_LOCK.lock();
        let mut host = host(HostOptions::default());

        let err = host
            .run("lcm_s32", NumericDomain::SignedInt32, &[1, 2])
            .unwrap_err();
        assert!(matches!(err, HostError::TypeMismatch { .. }));

        let err = host
            .run("store_s32", NumericDomain::SignedInt32, &[i128::from(i32::MAX) + 1])
            .unwrap_err();
        assert!(matches!(err, HostError::ArgumentOutOfRange { index: 0, .. }));

        let err = host.run("missing", NumericDomain::SignedInt32, &[]).unwrap_err();
        assert!(matches!(err, HostError::ExportNotFound { .. }));

        let err = host.run("fail", NumericDomain::SignedInt32, &[]).unwrap_err();
        assert!(err.is_guest_failure());
    }

    #[test]
    fn test_debug_output() {
        let _serial = HOST_LOCK.lock();
        let host = host(HostOptions::aot());

        let debug_str = format!("{host:?}");
        assert!(debug_str.contains("ExecutionHost"));
        assert!(debug_str.contains("aot_enabled: true"));
    }
}
