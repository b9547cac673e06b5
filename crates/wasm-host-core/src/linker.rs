//! Import resolution for guest modules.
//!
//! Guests may import WASI preview1 (`wasi_snapshot_preview1`). Any other
//! import fails instantiation with a load error naming it.

use tracing::debug;
use wasmtime::Linker;

use crate::WasmEngine;
use crate::store::HostContext;
use wasm_host_common::HostError;

/// Create a linker with every host import registered.
///
/// # Errors
///
/// Returns an error if import registration fails.
pub fn create_linker(engine: &WasmEngine) -> Result<Linker<HostContext>, HostError> {
    let mut linker = Linker::new(engine.inner());
    register_wasi(&mut linker)?;
    Ok(linker)
}

/// Register the WASI preview1 imports, backed by [`HostContext`]'s context.
///
/// # Errors
///
/// Returns an error if an import is already defined on the linker.
pub fn register_wasi(linker: &mut Linker<HostContext>) -> Result<(), HostError> {
    wasmtime_wasi::preview1::add_to_linker_sync(linker, |ctx: &mut HostContext| &mut ctx.wasi)
        .map_err(|e| HostError::load_failed(format!("Failed to register WASI imports: {e}")))?;

    debug!("WASI preview1 imports registered");
    Ok(())
}
