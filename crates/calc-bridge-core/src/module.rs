//! WebAssembly module compilation.
//!
//! This module provides [`CompiledModule`], a wrapper around Wasmtime's [`Module`]
//! that records a content hash of the source bytes. Sources may be Wasm
//! binaries or WAT text; [`CompiledModule::from_source`] picks the right path.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Instant;

use tracing::{info, instrument};
use wasmtime::{Engine, Module};

use calc_bridge_common::InitError;

const WASM_MAGIC: &[u8; 4] = b"\0asm";

/// A compiled WebAssembly module.
///
/// `CompiledModule` is cheap to clone; the underlying Wasmtime module is
/// reference counted and thread-safe.
#[derive(Clone)]
pub struct CompiledModule {
    inner: Module,

    /// Hash of the original source bytes.
    content_hash: String,
}

impl CompiledModule {
    /// Compile a module from either a Wasm binary or WAT text.
    ///
    /// Bytes that start with the Wasm magic number are treated as a binary;
    /// anything else must be UTF-8 WAT.
    ///
    /// # Errors
    ///
    /// Returns [`InitError::Compilation`] if the bytes are neither.
    pub fn from_source(engine: &Engine, bytes: &[u8]) -> Result<Self, InitError> {
        if bytes.starts_with(WASM_MAGIC) {
            return Self::from_bytes(engine, bytes);
        }

        let wat = std::str::from_utf8(bytes).map_err(|_| {
            InitError::compilation("Invalid Wasm: bad magic number and not UTF-8 text")
        })?;
        Self::from_wat(engine, wat)
    }

    /// Compile a core module from WebAssembly bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails (e.g., invalid Wasm).
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, InitError> {
        let start = Instant::now();

        Self::validate_wasm_header(bytes)?;

        let module = Module::from_binary(engine, bytes)
            .map_err(|e| InitError::compilation(format!("Core module compilation failed: {e}")))?;

        let content_hash = compute_hash(bytes);

        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "Core module compiled"
        );

        Ok(Self {
            inner: module,
            content_hash,
        })
    }

    /// Compile a core module from WAT (WebAssembly Text Format).
    ///
    /// # Errors
    ///
    /// Returns an error if the text does not parse or compile.
    #[instrument(skip(engine, wat))]
    pub fn from_wat(engine: &Engine, wat: &str) -> Result<Self, InitError> {
        let start = Instant::now();

        let module = Module::new(engine, wat)
            .map_err(|e| InitError::compilation(format!("WAT compilation failed: {e}")))?;

        let content_hash = compute_hash(wat.as_bytes());

        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "WAT module compiled"
        );

        Ok(Self {
            inner: module,
            content_hash,
        })
    }

    /// Get the content hash of the original source bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get the inner Wasmtime module.
    pub fn as_module(&self) -> &Module {
        &self.inner
    }

    /// Check whether the module exports a function with the given name.
    pub fn exports_func(&self, name: &str) -> bool {
        self.inner
            .get_export(name)
            .is_some_and(|ty| ty.func().is_some())
    }

    /// Validate WebAssembly header (magic number).
    fn validate_wasm_header(bytes: &[u8]) -> Result<(), InitError> {
        if bytes.len() < 8 {
            return Err(InitError::compilation("Invalid Wasm: file too small"));
        }

        if !bytes.starts_with(WASM_MAGIC) {
            return Err(InitError::compilation("Invalid Wasm: bad magic number"));
        }

        Ok(())
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WasmEngine;
    use calc_bridge_common::EngineConfig;

    // Minimal valid Wasm module (empty module)
    const MINIMAL_WASM: &[u8] = &[
        0x00, 0x61, 0x73, 0x6d, // magic: \0asm
        0x01, 0x00, 0x00, 0x00, // version: 1
    ];

    fn engine() -> WasmEngine {
        WasmEngine::new(&EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_validate_wasm_header() {
        assert!(CompiledModule::validate_wasm_header(MINIMAL_WASM).is_ok());
        assert!(CompiledModule::validate_wasm_header(&[0x00, 0x61]).is_err());
        assert!(
            CompiledModule::validate_wasm_header(&[0, 0, 0, 0, 1, 0, 0, 0]).is_err()
        );
    }

    #[test]
    fn test_compute_hash() {
        let hash1 = compute_hash(b"hello");
        let hash2 = compute_hash(b"hello");
        let hash3 = compute_hash(b"world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 16);
    }

    #[test]
    fn test_from_source_binary() {
        let engine = engine();
        let module = CompiledModule::from_source(engine.inner(), MINIMAL_WASM).unwrap();
        assert!(!module.content_hash().is_empty());
        assert!(!module.exports_func("add"));
    }

    #[test]
    fn test_from_source_wat() {
        let engine = engine();
        let wat = br#"(module (func (export "add") (param i32) (result i32) (local.get 0)))"#;
        let module = CompiledModule::from_source(engine.inner(), wat).unwrap();
        assert!(module.exports_func("add"));
        assert!(!module.exports_func("sub"));
    }

    #[test]
    fn test_from_source_garbage() {
        let engine = engine();

        let err = CompiledModule::from_source(engine.inner(), &[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, InitError::Compilation { .. }));

        let err = CompiledModule::from_source(engine.inner(), b"not a module").unwrap_err();
        assert!(matches!(err, InitError::Compilation { .. }));
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
