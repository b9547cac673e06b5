//! Host-side WebAssembly embedding.
//!
//! Loads a guest module from bytecode or a native AOT artifact, runs it in a
//! WASI sandbox, writes AOT artifacts, and invokes exports with exact integer
//! arguments in four numeric domains.
//!
//! ```ignore
//! use wasm_host::{ExecutionHost, HostOptions, ModuleSource, NumericDomain};
//!
//! wasm_host::init_tracing();
//!
//! let source = ModuleSource::from_path("integers.wasm");
//! let mut host = ExecutionHost::new(source, HostOptions::aot())?;
//! let lcm = host.invoke("lcm_u32", NumericDomain::UnsignedInt32, &[4_294_967_295, 2])?;
//! assert_eq!(lcm, 4_294_967_294);
//! host.compile("integers.wasm.so")?;
//! ```

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use wasm_host_common::{
    ConfigFile, ConfigFileError, EngineConfig, HostError, HostOptions, NumericDomain, OptLevel,
    SandboxConfig,
};
pub use wasm_host_core::{DomainValue, ExecutionHost, ExecutionStatistics, ModuleSource};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,wasm_host=debug";

/// Install a `tracing` subscriber writing to stderr.
///
/// The filter comes from `RUST_LOG`, falling back to [`DEFAULT_LOG_FILTER`].
/// Returns `false` if a global subscriber was already installed, so calling
/// this more than once is harmless.
pub fn init_tracing() -> bool {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}
