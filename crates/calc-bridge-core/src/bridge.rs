//! Bridge loading: the runtime constructor and the module bytes.
//!
//! A bridge manifest is a small TOML file that tells the host how to run a
//! compiled module:
//!
//! ```toml
//! [runtime]
//! abi = "calc-bridge/1"
//! entry_point = "_start"
//! export = "add"
//! exchange = "exchange_area"
//!
//! [imports]
//! module = "env"
//! log = true
//! wasi = false
//! ```
//!
//! [`BridgeLoader`] reads the manifest and the binary, and hands back a
//! [`RuntimeConstructor`] plus the raw bytes. The constructor builds the
//! [`Linker`] whose imports the module is instantiated against.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, instrument};
use wasmtime::Linker;

use calc_bridge_common::InitError;

use crate::WasmEngine;
use crate::abi::ABI_VERSION;
use crate::store::HostContext;

/// Host capabilities a module may import.
///
/// Implemented by the host-function crate; the core only decides *which*
/// capabilities a runtime asks for.
pub trait ImportSurface: Send + Sync {
    /// Define the imports described by `requirements` on `linker`.
    fn link(
        &self,
        linker: &mut Linker<HostContext>,
        requirements: &ImportRequirements,
    ) -> Result<(), InitError>;
}

/// What the runtime needs from the host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImportRequirements {
    /// Import module name the host functions live under.
    #[serde(default = "defaults::import_module")]
    pub module: String,

    /// Provide the `log` host function.
    #[serde(default = "defaults::log")]
    pub log: bool,

    /// Provide the WASI preview1 surface.
    #[serde(default)]
    pub wasi: bool,
}

impl Default for ImportRequirements {
    fn default() -> Self {
        Self {
            module: defaults::import_module(),
            log: defaults::log(),
            wasi: false,
        }
    }
}

/// How the runtime starts the module and finds its export.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RuntimeSpec {
    /// Calling convention identifier.
    pub abi: String,

    /// Function run once, in the background, at startup.
    #[serde(default = "defaults::entry_point")]
    pub entry_point: String,

    /// Export the module is expected to register.
    #[serde(default = "defaults::export")]
    pub export: String,

    /// Function returning the address of the exchange area.
    #[serde(default = "defaults::exchange")]
    pub exchange: String,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    runtime: Option<RuntimeSpec>,
    #[serde(default)]
    imports: ImportRequirements,
}

/// Builds runtime instances for one manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConstructor {
    spec: RuntimeSpec,
    imports: ImportRequirements,
}

impl RuntimeConstructor {
    /// Parse a manifest.
    ///
    /// # Errors
    ///
    /// Returns [`InitError::Bootstrap`] if the text is not TOML, lacks a
    /// `[runtime]` table, or declares an unsupported ABI.
    pub fn from_manifest(source: &str) -> Result<Self, InitError> {
        let raw: RawManifest = toml::from_str(source)
            .map_err(|e| InitError::bootstrap(format!("manifest is not valid TOML: {e}")))?;

        let spec = raw.runtime.ok_or_else(|| {
            InitError::bootstrap("manifest does not define a [runtime] constructor")
        })?;

        if spec.abi != ABI_VERSION {
            return Err(InitError::bootstrap(format!(
                "unsupported runtime ABI '{}' (expected '{ABI_VERSION}')",
                spec.abi
            )));
        }

        Ok(Self {
            spec,
            imports: raw.imports,
        })
    }

    /// The runtime description.
    pub fn spec(&self) -> &RuntimeSpec {
        &self.spec
    }

    /// The import requirements.
    pub fn imports(&self) -> &ImportRequirements {
        &self.imports
    }

    /// Build a linker that satisfies the import requirements.
    ///
    /// # Errors
    ///
    /// Returns [`InitError::Instantiation`] if the host cannot provide an
    /// import.
    pub fn build_linker(
        &self,
        engine: &WasmEngine,
        surface: &dyn ImportSurface,
    ) -> Result<Linker<HostContext>, InitError> {
        let mut linker = Linker::new(engine.inner());
        surface.link(&mut linker, &self.imports)?;
        Ok(linker)
    }
}

/// Output of [`BridgeLoader::load`].
#[derive(Debug)]
pub struct LoadedBridge {
    /// The runtime constructor from the manifest.
    pub constructor: RuntimeConstructor,
    /// The module bytes (Wasm binary or WAT text).
    pub binary: Vec<u8>,
}

/// Reads the manifest and the module bytes.
#[derive(Debug, Clone)]
pub struct BridgeLoader {
    bootstrap_path: PathBuf,
    binary_path: PathBuf,
}

impl BridgeLoader {
    /// Create a loader for the given paths.
    pub fn new(bootstrap_path: impl Into<PathBuf>, binary_path: impl Into<PathBuf>) -> Self {
        Self {
            bootstrap_path: bootstrap_path.into(),
            binary_path: binary_path.into(),
        }
    }

    /// Path of the manifest.
    pub fn bootstrap_path(&self) -> &Path {
        &self.bootstrap_path
    }

    /// Path of the module bytes.
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Read both files and parse the manifest.
    ///
    /// # Errors
    ///
    /// Returns [`InitError::Io`] if either file cannot be read, and
    /// [`InitError::Bootstrap`] if the manifest is unusable.
    #[instrument(skip(self), fields(
        bootstrap = %self.bootstrap_path.display(),
        binary = %self.binary_path.display(),
    ))]
    pub async fn load(&self) -> Result<LoadedBridge, InitError> {
        let source = tokio::fs::read_to_string(&self.bootstrap_path)
            .await
            .map_err(|e| InitError::io(self.bootstrap_path.display().to_string(), e))?;

        let constructor = RuntimeConstructor::from_manifest(&source)?;

        let binary = tokio::fs::read(&self.binary_path)
            .await
            .map_err(|e| InitError::io(self.binary_path.display().to_string(), e))?;

        debug!(
            export = %constructor.spec().export,
            binary_len = binary.len(),
            "Bridge loaded"
        );

        Ok(LoadedBridge {
            constructor,
            binary,
        })
    }
}

/// Default value functions for serde.
mod defaults {
    pub fn import_module() -> String {
        "env".to_string()
    }

    pub const fn log() -> bool {
        true
    }

    pub fn entry_point() -> String {
        "_start".to_string()
    }

    pub fn export() -> String {
        "add".to_string()
    }

    pub fn exchange() -> String {
        "exchange_area".to_string()
    }
}
