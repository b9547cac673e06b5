//! Core Wasmtime embedding for wasm-host.
//!
//! This crate provides the execution host and everything it is built from:
//! - [`WasmEngine`]: Configured Wasmtime engine
//! - [`ModuleSource`] and [`CompiledModule`]: Loading bytecode and AOT artifacts
//! - [`HostContext`]: Store state carrying the WASI sandbox
//! - [`ExecutionHost`]: Instantiation, typed invocation, and AOT output
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     EngineSlot                          │
//! │  (Process-wide, one live host at a time)                │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │              WasmEngine + CompiledModule                │
//! │  - Cranelift compilation or artifact deserialization    │
//! │  - Content-addressed AOT cache                          │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │            Store<HostContext> + Instance                │
//! │  - WASI preview1 sandbox (args, env, preopens)          │
//! │  - Fuel metering and statistics                         │
//! │  - Domain-checked integer invocation                    │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod aot;
pub mod engine;
pub mod host;
pub mod invoke;
pub mod linker;
pub mod module;
pub mod slot;
pub mod store;

pub use aot::ArtifactCache;
pub use engine::WasmEngine;
pub use host::ExecutionHost;
pub use invoke::DomainValue;
pub use module::{CompiledModule, ModuleSource};
pub use slot::EngineSlot;
pub use store::{ExecutionStatistics, HostContext};
