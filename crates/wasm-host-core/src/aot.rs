//! AOT artifact output and caching.
//!
//! Artifacts are written to a temporary file beside the destination and
//! renamed into place, so a `.so` path only ever holds a complete artifact.
//! The temporary name does not carry the artifact extension.
//!
//! [`ArtifactCache`] keeps content-addressed artifacts
//! (`{blake3}-{engine}.so`) for hosts constructed with AOT enabled from
//! bytecode. The engine part keeps artifacts of differently configured
//! engines apart.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};
use wasmtime::Engine;

use wasm_host_common::{AOT_ARTIFACT_EXTENSION, HostError};

use crate::module::{CompiledModule, compute_hash, has_artifact_extension};

/// Check that `path` may receive an AOT artifact.
///
/// # Errors
///
/// Returns [`HostError::InvalidArtifactPath`] unless the final segment ends
/// with `.so`.
pub fn ensure_artifact_path(path: &Path) -> Result<(), HostError> {
    if has_artifact_extension(path) {
        Ok(())
    } else {
        Err(HostError::InvalidArtifactPath {
            path: path.to_path_buf(),
        })
    }
}

/// Write `bytes` to `path` with all-or-nothing visibility.
///
/// An existing file at `path` is replaced only by the final rename and
/// its permissions carry over; a new artifact is readable by everyone.
///
/// # Errors
///
/// Returns [`HostError::Io`] if the temporary file cannot be created,
/// written, synced, or renamed.
pub fn write_artifact(path: &Path, bytes: &[u8]) -> Result<(), HostError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".wasm-host-")
        .suffix(".partial")
        .tempfile_in(dir)
        .map_err(|e| HostError::io(dir, e))?;

    tmp.write_all(bytes)
        .and_then(|()| match artifact_permissions(path) {
            Some(permissions) => tmp.as_file().set_permissions(permissions),
            None => Ok(()),
        })
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| HostError::io(tmp.path(), e))?;

    tmp.persist(path).map_err(|e| HostError::io(path, e.error))?;

    debug!(path = %path.display(), bytes = bytes.len(), "Artifact written");
    Ok(())
}

/// Permissions for an artifact written to `path`: those of the file it
/// replaces, else `0o644` on Unix.
fn artifact_permissions(path: &Path) -> Option<fs::Permissions> {
    if let Ok(metadata) = fs::metadata(path) {
        return Some(metadata.permissions());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Some(fs::Permissions::from_mode(0o644))
    }

    #[cfg(not(unix))]
    None
}

/// Content-addressed store of AOT artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    dir: PathBuf,
}

impl ArtifactCache {
    /// Use `dir` as the cache directory. It is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the artifact `engine` produces for bytecode with the given
    /// content hash.
    pub fn artifact_path(&self, engine: &Engine, content_hash: &str) -> PathBuf {
        let engine_key = engine_key(engine);
        self.dir
            .join(format!("{content_hash}-{engine_key}.{AOT_ARTIFACT_EXTENSION}"))
    }

    /// Load the cached artifact for `bytes`, compiling and caching on a miss.
    ///
    /// A cached artifact the engine rejects (other Wasmtime version or
    /// engine settings) is recompiled and overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Load`] if `bytes` is not a valid module and
    /// [`HostError::Io`] if the artifact cannot be written.
    #[instrument(skip(self, engine, bytes), fields(dir = %self.dir.display()))]
    pub fn load_or_compile(
        &self,
        engine: &Engine,
        bytes: &[u8],
    ) -> Result<CompiledModule, HostError> {
        let content_hash = compute_hash(bytes);
        let path = self.artifact_path(engine, &content_hash);

        if path.is_file() {
            match CompiledModule::load_artifact(engine, &path, Some(content_hash.clone())) {
                Ok(module) => {
                    debug!(content_hash = %content_hash, "AOT cache hit");
                    return Ok(module);
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Cached artifact unusable, recompiling"
                    );
                }
            }
        }

        let module = CompiledModule::from_bytes(engine, bytes)?;
        let artifact = module.serialize()?;

        std::fs::create_dir_all(&self.dir).map_err(|e| HostError::io(&self.dir, e))?;
        write_artifact(&path, &artifact)?;

        info!(
            content_hash = %content_hash,
            path = %path.display(),
            bytes = artifact.len(),
            "AOT artifact cached"
        );

        Ok(module)
    }
}

/// Short key of the engine settings an artifact depends on.
fn engine_key(engine: &Engine) -> String {
    let mut hasher = DefaultHasher::new();
    engine.precompile_compatibility_hash().hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
