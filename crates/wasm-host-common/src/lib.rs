//! Common types, errors, and configuration for wasm-host.
//!
//! This crate provides shared functionality used across the wasm-host workspace:
//! - [`HostError`], the error taxonomy of every host operation
//! - [`NumericDomain`], the four integer domains of the invocation surface
//! - Configuration structures for the engine, the sandbox, and the host

pub mod config;
pub mod config_file;
pub mod domain;
pub mod error;

pub use config::{EngineConfig, HostOptions, OptLevel, SandboxConfig};
pub use config_file::{ConfigFile, ConfigFileError};
pub use domain::{NumericDomain, WasmIntType};
pub use error::HostError;

/// File extension reserved for AOT artifacts.
pub const AOT_ARTIFACT_EXTENSION: &str = "so";
