//! WebAssembly module sources and compilation.
//!
//! This module provides:
//! - [`ModuleSource`]: where a module comes from (bytecode file, AOT artifact, bytes)
//! - [`CompiledModule`]: a Wasmtime [`Module`] with its content hash
//!
//! # Load Strategies
//!
//! - **Bytecode**: compile Wasm bytes with Cranelift at load time
//! - **Artifact**: deserialize a native artifact written by an earlier host
//!
//! Raw bytes are classified by magic number, so an artifact read into
//! memory loads the same way as one named by path.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, instrument};
use wasmtime::{Engine, ExternType, Module};

use wasm_host_common::{AOT_ARTIFACT_EXTENSION, HostError};

use crate::aot::ArtifactCache;

/// Where a WebAssembly program comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    /// A `.wasm` bytecode file.
    BytecodePath(PathBuf),
    /// A native artifact produced by [`crate::ExecutionHost::compile`].
    ///
    /// The file name must end with `.so`.
    PrecompiledArtifactPath(PathBuf),
    /// Bytecode or a native artifact held in memory.
    RawBytes(Vec<u8>),
}

impl ModuleSource {
    /// Pick the path variant by the artifact extension convention.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if has_artifact_extension(&path) {
            Self::PrecompiledArtifactPath(path)
        } else {
            Self::BytecodePath(path)
        }
    }

    /// Returns `true` if this source names or holds a native artifact.
    pub fn is_precompiled(&self) -> bool {
        match self {
            Self::BytecodePath(_) => false,
            Self::PrecompiledArtifactPath(_) => true,
            Self::RawBytes(bytes) => BytesFormat::detect(bytes) == BytesFormat::Native,
        }
    }
}

impl From<Vec<u8>> for ModuleSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::RawBytes(bytes)
    }
}

impl fmt::Display for ModuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BytecodePath(path) => write!(f, "bytecode:{}", path.display()),
            Self::PrecompiledArtifactPath(path) => write!(f, "artifact:{}", path.display()),
            Self::RawBytes(bytes) => write!(f, "bytes[{}]", bytes.len()),
        }
    }
}

/// Returns `true` if the path's final segment ends with `.so`.
pub fn has_artifact_extension(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_suffix(AOT_ARTIFACT_EXTENSION))
        .is_some_and(|stem| stem.len() > 1 && stem.ends_with('.'))
}

/// Format of an in-memory module, by magic number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BytesFormat {
    /// `\0asm`
    Wasm,
    /// ELF or Mach-O
    Native,
    Unknown,
}

impl BytesFormat {
    pub(crate) fn detect(bytes: &[u8]) -> Self {
        let Some(magic) = bytes.get(..4) else {
            return Self::Unknown;
        };

        if magic == b"\0asm" {
            Self::Wasm
        } else if NATIVE_MAGICS.iter().any(|m| *m == magic) {
            Self::Native
        } else {
            Self::Unknown
        }
    }
}

/// ELF, then Mach-O 32/64-bit in both byte orders, then Mach-O universal.
const NATIVE_MAGICS: [&[u8]; 6] = [
    b"\x7fELF",
    &[0xfe, 0xed, 0xfa, 0xce],
    &[0xfe, 0xed, 0xfa, 0xcf],
    &[0xce, 0xfa, 0xed, 0xfe],
    &[0xcf, 0xfa, 0xed, 0xfe],
    &[0xca, 0xfe, 0xba, 0xbe],
];

/// A compiled WebAssembly module.
///
/// Wraps a Wasmtime [`Module`] with the hash of the bytes it was built from,
/// which names its entry in the AOT artifact cache.
#[derive(Clone)]
pub struct CompiledModule {
    /// The compiled Wasmtime module.
    inner: Module,

    /// BLAKE3 hash of the original bytes.
    content_hash: String,

    /// Whether this module was deserialized from a native artifact.
    precompiled: bool,
}

impl CompiledModule {
    /// Resolve a [`ModuleSource`] into a compiled module.
    ///
    /// Bytecode is compiled, or served from `cache` when one is given.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Load`] if the source is missing, empty, or not a
    /// valid module, and [`HostError::Io`] if a cache write fails.
    #[instrument(skip_all, fields(source = %source))]
    pub fn from_source(
        engine: &Engine,
        source: &ModuleSource,
        cache: Option<&ArtifactCache>,
    ) -> Result<Self, HostError> {
        match source {
            ModuleSource::BytecodePath(path) => {
                let bytes = read_module_file(path)?;
                Self::from_bytecode(engine, &bytes, cache)
            }
            ModuleSource::PrecompiledArtifactPath(path) => Self::from_precompiled(engine, path),
            ModuleSource::RawBytes(bytes) if bytes.is_empty() => {
                Err(HostError::load_failed("module bytes are empty"))
            }
            ModuleSource::RawBytes(bytes) => match BytesFormat::detect(bytes) {
                BytesFormat::Wasm => Self::from_bytecode(engine, bytes, cache),
                BytesFormat::Native => Self::from_precompiled_bytes(engine, bytes),
                BytesFormat::Unknown => Err(HostError::load_failed("unknown bytecode format")),
            },
        }
    }

    fn from_bytecode(
        engine: &Engine,
        bytes: &[u8],
        cache: Option<&ArtifactCache>,
    ) -> Result<Self, HostError> {
        match cache {
            Some(cache) => cache.load_or_compile(engine, bytes),
            None => Self::from_bytes(engine, bytes),
        }
    }

    /// Compile a core module from WebAssembly bytes.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Load`] if the bytes are not a valid module.
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, HostError> {
        let start = Instant::now();

        Self::validate_wasm_header(bytes)?;

        let module = Module::new(engine, bytes)
            .map_err(|e| HostError::load_failed(format!("Module compilation failed: {e:#}")))?;

        let content_hash = compute_hash(bytes);

        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "Module compiled"
        );

        Ok(Self {
            inner: module,
            content_hash,
            precompiled: false,
        })
    }

    /// Load a native artifact from disk.
    ///
    /// The content hash is the hash of the artifact bytes, the same value
    /// [`CompiledModule::from_precompiled_bytes`] reports for them.
    ///
    /// # Safety
    ///
    /// Deserializing runs no guest code but trusts the artifact's machine
    /// code. Only load artifacts written by a host built against the same
    /// Wasmtime version and [`wasm_host_common::EngineConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Load`] if the path does not end with `.so`, does
    /// not exist, or is not a compatible artifact.
    pub fn from_precompiled(engine: &Engine, path: &Path) -> Result<Self, HostError> {
        Self::load_artifact(engine, path, None)
    }

    /// Load a native artifact from disk, identified by `content_hash` when
    /// given and by the hash of the file otherwise.
    #[allow(unsafe_code)]
    #[instrument(skip(engine, content_hash))]
    pub(crate) fn load_artifact(
        engine: &Engine,
        path: &Path,
        content_hash: Option<String>,
    ) -> Result<Self, HostError> {
        let start = Instant::now();

        if !has_artifact_extension(path) {
            return Err(HostError::load_failed(format!(
                "precompiled artifact '{}' must end with '.{AOT_ARTIFACT_EXTENSION}'",
                path.display()
            )));
        }
        if !path.is_file() {
            return Err(HostError::load_failed(format!(
                "artifact '{}' does not exist",
                path.display()
            )));
        }

        // SAFETY: artifacts are produced by `ExecutionHost::compile` or the
        // artifact cache; Wasmtime rejects ones from other engine settings.
        let module = unsafe { Module::deserialize_file(engine, path) }.map_err(|e| {
            HostError::load_failed(format!(
                "Failed to load precompiled module from {}: {e}",
                path.display()
            ))
        })?;

        let content_hash = match content_hash {
            Some(hash) => hash,
            None => compute_hash(&read_module_file(path)?),
        };

        debug!(
            path = %path.display(),
            content_hash = %content_hash,
            duration_us = start.elapsed().as_micros(),
            "Precompiled module loaded"
        );

        Ok(Self {
            inner: module,
            content_hash,
            precompiled: true,
        })
    }

    /// Load a native artifact held in memory.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Load`] if the bytes are not a compatible artifact.
    #[allow(unsafe_code)]
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_precompiled_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, HostError> {
        // SAFETY: same trust model as `from_precompiled`.
        let module = unsafe { Module::deserialize(engine, bytes) }.map_err(|e| {
            HostError::load_failed(format!("Failed to load precompiled module: {e}"))
        })?;

        debug!("Precompiled module loaded from memory");

        Ok(Self {
            inner: module,
            content_hash: compute_hash(bytes),
            precompiled: true,
        })
    }

    /// Serialize the compiled module into a native artifact.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Compile`] if serialization fails.
    pub fn serialize(&self) -> Result<Vec<u8>, HostError> {
        self.inner
            .serialize()
            .map_err(|e| HostError::compile_failed(format!("Module serialization failed: {e}")))
    }

    /// Names of the exported functions, in module order.
    pub fn function_exports(&self) -> Vec<String> {
        self.inner
            .exports()
            .filter(|export| matches!(export.ty(), ExternType::Func(_)))
            .map(|export| export.name().to_string())
            .collect()
    }

    /// Returns `true` if the module exports a function called `name`.
    pub fn exports_function(&self, name: &str) -> bool {
        matches!(self.inner.get_export(name), Some(ExternType::Func(_)))
    }

    /// Get the content hash: of the bytecode for compiled and cached
    /// modules, of the artifact for artifacts loaded directly.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Check if this module was loaded from a native artifact.
    pub fn is_precompiled(&self) -> bool {
        self.precompiled
    }

    /// Get the inner Wasmtime module.
    pub fn inner(&self) -> &Module {
        &self.inner
    }

    /// Validate WebAssembly header (magic number).
    fn validate_wasm_header(bytes: &[u8]) -> Result<(), HostError> {
        if bytes.len() < 8 {
            return Err(HostError::load_failed("Invalid Wasm: file too small"));
        }

        if BytesFormat::detect(bytes) != BytesFormat::Wasm {
            return Err(HostError::load_failed("Invalid Wasm: bad magic number"));
        }

        Ok(())
    }
}

impl fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledModule")
            .field("content_hash", &self.content_hash)
            .field("precompiled", &self.precompiled)
            .finish_non_exhaustive()
    }
}

/// Read a module file, mapping every failure to a load error.
fn read_module_file(path: &Path) -> Result<Vec<u8>, HostError> {
    if !path.is_file() {
        return Err(HostError::load_failed(format!(
            "module file '{}' does not exist",
            path.display()
        )));
    }

    let bytes = std::fs::read(path).map_err(|e| {
        HostError::load_failed(format!("cannot read '{}': {e}", path.display()))
    })?;

    if bytes.is_empty() {
        return Err(HostError::load_failed(format!(
            "module file '{}' is empty",
            path.display()
        )));
    }

    Ok(bytes)
}

/// Compute the BLAKE3 hash of the given bytes, hex encoded.
pub(crate) fn compute_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WasmEngine;
    use wasm_host_common::EngineConfig;

    // Minimal valid Wasm module (empty module)
    const MINIMAL_WASM: &[u8] = &[
        0x00, 0x61, 0x73, 0x6d, // magic: \0asm
        0x01, 0x00, 0x00, 0x00, // version: 1
    ];

    fn engine() -> WasmEngine {
        WasmEngine::new(&EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_from_path_uses_extension() {
        assert_eq!(
            ModuleSource::from_path("pkg/integers.wasm.so"),
            ModuleSource::PrecompiledArtifactPath("pkg/integers.wasm.so".into())
        );
        assert_eq!(
            ModuleSource::from_path("pkg/integers.wasm"),
            ModuleSource::BytecodePath("pkg/integers.wasm".into())
        );
    }

    #[test]
    fn test_artifact_extension() {
        assert!(has_artifact_extension(Path::new("a.so")));
        assert!(has_artifact_extension(Path::new("/tmp/x/lib.aot.so")));
        assert!(!has_artifact_extension(Path::new("a.wasm")));
        assert!(!has_artifact_extension(Path::new("aso")));
        assert!(!has_artifact_extension(Path::new(".so")));
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(BytesFormat::detect(MINIMAL_WASM), BytesFormat::Wasm);
        assert_eq!(BytesFormat::detect(b"\x7fELF\x02\x01"), BytesFormat::Native);
        assert_eq!(
            BytesFormat::detect(&[0xcf, 0xfa, 0xed, 0xfe, 0, 0]),
            BytesFormat::Native
        );
        assert_eq!(BytesFormat::detect(b"PK\x03\x04"), BytesFormat::Unknown);
        assert_eq!(BytesFormat::detect(b"\0a"), BytesFormat::Unknown);
    }

    #[test]
    fn test_validate_wasm_header_too_small() {
        let result = CompiledModule::validate_wasm_header(&[0x00, 0x61]);
        assert!(matches!(result, Err(HostError::Load { .. })));
    }

    #[test]
    fn test_validate_wasm_header_bad_magic() {
        let bad_wasm = &[0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
        assert!(CompiledModule::validate_wasm_header(bad_wasm).is_err());
    }

    #[test]
    fn test_compute_hash() {
        let hash1 = compute_hash(b"hello");
        let hash2 = compute_hash(b"hello");
        let hash3 = compute_hash(b"world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_module_compilation() {
        let engine = engine();
        let module = CompiledModule::from_bytes(engine.inner(), MINIMAL_WASM).unwrap();

        assert!(!module.is_precompiled());
        assert!(module.function_exports().is_empty());
        assert_eq!(module.content_hash(), compute_hash(MINIMAL_WASM));
    }

    #[test]
    fn test_function_exports_in_order() {
        let engine = engine();
        let wasm = wat::parse_str(
            r#"(module
                (memory (export "memory") 1)
                (func (export "b") (result i32) (i32.const 1))
                (func (export "a") (result i32) (i32.const 2)))"#,
        )
        .unwrap();
        let module = CompiledModule::from_bytes(engine.inner(), &wasm).unwrap();

        assert_eq!(module.function_exports(), vec!["b", "a"]);
        assert!(module.exports_function("a"));
        assert!(!module.exports_function("memory"));
    }

    #[test]
    fn test_serialize_round_trip_in_memory() {
        let engine = engine();
        let module = CompiledModule::from_bytes(engine.inner(), MINIMAL_WASM).unwrap();
        let artifact = module.serialize().unwrap();

        assert_eq!(BytesFormat::detect(&artifact), BytesFormat::Native);
        let source = ModuleSource::RawBytes(artifact);
        assert!(source.is_precompiled());

        let reloaded = CompiledModule::from_source(engine.inner(), &source, None).unwrap();
        assert!(reloaded.is_precompiled());
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let engine = engine();
        let source = ModuleSource::BytecodePath("/no/such/module.wasm".into());

        let err = CompiledModule::from_source(engine.inner(), &source, None).unwrap_err();
        assert!(matches!(err, HostError::Load { .. }));
    }

    #[test]
    fn test_empty_and_unknown_bytes() {
        let engine = engine();

        let err = CompiledModule::from_source(engine.inner(), &ModuleSource::RawBytes(vec![]), None)
            .unwrap_err();
        assert!(err.to_string().contains("empty"));

        let err = CompiledModule::from_source(
            engine.inner(),
            &ModuleSource::RawBytes(b"not a module".to_vec()),
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown bytecode format"));
    }

    #[test]
    fn test_precompiled_requires_extension() {
        let engine = engine();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("module.bin");
        std::fs::write(&path, b"\x7fELF").unwrap();

        let err = CompiledModule::from_precompiled(engine.inner(), &path).unwrap_err();
        assert!(err.to_string().contains(".so"));
    }

    #[test]
    fn test_garbage_artifact_is_load_error() {
        let engine = engine();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.so");
        std::fs::write(&path, b"\x7fELF definitely not an artifact").unwrap();

        let err = CompiledModule::from_precompiled(engine.inner(), &path).unwrap_err();
        assert!(matches!(err, HostError::Load { .. }));
    }

    #[test]
    fn test_artifact_hash_same_by_path_and_bytes() {
        let engine = engine();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("integers.wasm.so");

        let module = CompiledModule::from_bytes(engine.inner(), MINIMAL_WASM).unwrap();
        let artifact = module.serialize().unwrap();
        std::fs::write(&path, &artifact).unwrap();

        let by_path = CompiledModule::from_precompiled(engine.inner(), &path).unwrap();
        let by_bytes = CompiledModule::from_precompiled_bytes(engine.inner(), &artifact).unwrap();

        assert_eq!(by_path.content_hash(), by_bytes.content_hash());
        assert_eq!(by_path.content_hash(), compute_hash(&artifact));
        assert_ne!(by_path.content_hash(), "integers.wasm");
    }

    #[test]
    fn test_module_debug() {
        let engine = engine();
        let module = CompiledModule::from_bytes(engine.inner(), MINIMAL_WASM).unwrap();

        let debug_str = format!("{module:?}");
        assert!(debug_str.contains("CompiledModule"));
        assert!(debug_str.contains("content_hash"));
    }
}
