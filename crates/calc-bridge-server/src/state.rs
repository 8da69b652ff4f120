//! Shared application state.
//!
//! This module provides [`AppState`], which holds shared resources
//! across all HTTP request handlers.

use std::sync::Arc;

use calc_bridge_common::{RuntimeConfig, RuntimeError};
use calc_bridge_core::{ModuleHost, WasmEngine};
use calc_bridge_host::HostImports;

/// Shared state across all request handlers.
///
/// This struct is cloned for each request, so it uses `Arc` for shared data.
#[derive(Clone)]
pub struct AppState {
    /// The process-wide module host.
    host: Arc<ModuleHost>,
}

impl AppState {
    /// Create new application state.
    ///
    /// Builds the engine and the module host. The module itself is not
    /// loaded until the first request needs it.
    ///
    /// # Errors
    ///
    /// Returns an error if engine creation fails.
    pub fn new(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        let engine = WasmEngine::new(&config.engine)?;
        let host = ModuleHost::new(engine, config, Arc::new(HostImports));

        Ok(Self::from_host(Arc::new(host)))
    }

    /// Wrap an existing module host.
    pub fn from_host(host: Arc<ModuleHost>) -> Self {
        Self { host }
    }

    /// Get the module host.
    pub fn host(&self) -> &ModuleHost {
        &self.host
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("host", &self.host)
            .finish()
    }
}
