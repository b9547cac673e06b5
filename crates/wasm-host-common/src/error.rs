//! Error types for wasm-host.
//!
//! [`HostError`] is the single error type surfaced by every host operation.
//! Its variants fall into three remediation classes:
//! - caller errors (bad arguments, wrong domain, bad paths or config)
//! - guest failures (traps)
//! - artifact pipeline failures (compilation, filesystem)

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::NumericDomain;

/// Errors raised while loading, compiling, or invoking a WebAssembly module.
#[derive(Error, Debug)]
pub enum HostError {
    /// The module source is missing, unreadable, malformed, or cannot be
    /// instantiated.
    #[error("Load failed: {reason}")]
    Load {
        /// Description of the load failure.
        reason: String,
    },

    /// An AOT output path does not end with the artifact extension.
    #[error(
        "Invalid artifact path '{}': expected a '.{}' file",
        .path.display(),
        crate::AOT_ARTIFACT_EXTENSION
    )]
    InvalidArtifactPath {
        /// The rejected path.
        path: PathBuf,
    },

    /// The module could not be lowered to a native artifact.
    #[error("Compilation failed: {reason}")]
    Compile {
        /// Description of the compilation failure.
        reason: String,
    },

    /// A filesystem operation failed while writing an artifact.
    #[error("IO error at '{}': {source}", .path.display())]
    Io {
        /// The path being written.
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The named function is not exported by the module.
    #[error("Export not found: {name}")]
    ExportNotFound {
        /// The requested export name.
        name: String,
    },

    /// An argument does not fit the requested numeric domain.
    #[error("Argument {index} out of range for {domain}: {value}")]
    ArgumentOutOfRange {
        /// Zero-based argument position.
        index: usize,
        /// The offending value.
        value: i128,
        /// The requested domain.
        domain: NumericDomain,
    },

    /// The export's signature does not match the requested call.
    #[error("Type mismatch calling '{name}': expected {expected}, found {actual}")]
    TypeMismatch {
        /// The export name.
        name: String,
        /// Signature implied by the call.
        expected: String,
        /// Signature declared by the module.
        actual: String,
    },

    /// The guest trapped during execution.
    #[error("Wasm trap: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
        /// Trap code if available.
        code: Option<String>,
    },

    /// A second execution host was constructed while one is alive.
    #[error("Engine slot already held by host {owner}; one execution host per process")]
    SingletonViolation {
        /// Identifier of the host currently holding the slot.
        owner: String,
    },

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

impl HostError {
    /// Create a new `Load` error.
    pub fn load_failed(reason: impl Into<String>) -> Self {
        Self::Load {
            reason: reason.into(),
        }
    }

    /// Create a new `Compile` error.
    pub fn compile_failed(reason: impl Into<String>) -> Self {
        Self::Compile {
            reason: reason.into(),
        }
    }

    /// Create a new `Io` error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a new `ExportNotFound` error.
    pub fn export_not_found(name: impl Into<String>) -> Self {
        Self::ExportNotFound { name: name.into() }
    }

    /// Create a new `Trap` error.
    pub fn trap(message: impl Into<String>, code: Option<String>) -> Self {
        Self::Trap {
            message: message.into(),
            code,
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the caller supplied something invalid.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::ArgumentOutOfRange { .. }
                | Self::TypeMismatch { .. }
                | Self::ExportNotFound { .. }
                | Self::InvalidArtifactPath { .. }
                | Self::InvalidConfig { .. }
        )
    }

    /// Returns `true` if the guest program itself failed.
    pub fn is_guest_failure(&self) -> bool {
        matches!(self, Self::Trap { .. })
    }

    /// Returns `true` if the artifact pipeline failed.
    pub fn is_artifact_failure(&self) -> bool {
        matches!(self, Self::Compile { .. } | Self::Io { .. })
    }

    /// The trap code, if this is a trap that carried one.
    pub fn trap_code(&self) -> Option<&str> {
        match self {
            Self::Trap { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}
