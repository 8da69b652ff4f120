//! Configuration structures for calc-bridge.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings
//! - [`ExecutionConfig`]: Per-call execution limits (fuel, timeout)
//! - [`ModuleConfig`]: Where the module lives and how long to wait for it
//! - [`RunMode`]: Development/production switch

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for the module host.
/// It can be loaded from files (TOML, JSON) or built in code.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-call execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Module location and readiness wait settings.
    #[serde(default)]
    pub module: ModuleConfig,

    /// Development or production mode.
    #[serde(default)]
    pub mode: RunMode,
}

/// Wasmtime engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable pooling allocator for instance creation.
    ///
    /// The host keeps a single long-lived instance, so this is off by default.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
        }
    }
}

/// Per-call execution configuration.
///
/// These settings bound each call into the module, and the module's entry
/// point during startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Fuel (CPU instructions) granted to each call.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,

    /// Enable fuel metering.
    #[serde(default = "defaults::fuel_metering")]
    pub fuel_metering: bool,

    /// Wall-clock limit for a single call in milliseconds.
    #[serde(default = "defaults::call_timeout_ms")]
    pub call_timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_fuel: defaults::max_fuel(),
            fuel_metering: defaults::fuel_metering(),
            call_timeout_ms: defaults::call_timeout_ms(),
        }
    }
}

impl ExecutionConfig {
    /// Get the call timeout as a `Duration`.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Module location and readiness settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModuleConfig {
    /// Path to the bridge manifest that describes the runtime.
    #[serde(default = "defaults::bootstrap_path")]
    pub bootstrap_path: PathBuf,

    /// Path to the compiled module (`.wasm`, or `.wat` text).
    #[serde(default = "defaults::binary_path")]
    pub binary_path: PathBuf,

    /// How long to wait for the module to register its export.
    #[serde(default = "defaults::ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    /// Fallback polling interval while waiting for the export.
    #[serde(default = "defaults::poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            bootstrap_path: defaults::bootstrap_path(),
            binary_path: defaults::binary_path(),
            ready_timeout_ms: defaults::ready_timeout_ms(),
            poll_interval_ms: defaults::poll_interval_ms(),
        }
    }
}

impl ModuleConfig {
    /// Create a module config for the given manifest and binary.
    pub fn new(bootstrap_path: impl Into<PathBuf>, binary_path: impl Into<PathBuf>) -> Self {
        Self {
            bootstrap_path: bootstrap_path.into(),
            binary_path: binary_path.into(),
            ..Default::default()
        }
    }

    /// Get the readiness timeout as a `Duration`.
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// Get the polling interval as a `Duration`.
    ///
    /// Clamped to at least one millisecond.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Process mode.
///
/// Only affects diagnostics: development mode logs module reloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Verbose diagnostics.
    #[default]
    Development,
    /// Quiet diagnostics.
    Production,
}

impl RunMode {
    /// Returns `true` in development mode.
    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Development => write!(f, "development"),
            RunMode::Production => write!(f, "production"),
        }
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!(
                "unknown mode '{other}', expected 'development' or 'production'"
            )),
        }
    }
}

/// Default value functions for serde.
mod defaults {
    use std::path::PathBuf;

    pub const fn pooling_allocator() -> bool {
        false
    }

    pub const fn max_instances() -> u32 {
        16
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn max_fuel() -> u64 {
        10_000_000
    }

    pub const fn fuel_metering() -> bool {
        true
    }

    pub const fn call_timeout_ms() -> u64 {
        1000
    }

    pub fn bootstrap_path() -> PathBuf {
        PathBuf::from("guests/adder/bridge.toml")
    }

    pub fn binary_path() -> PathBuf {
        PathBuf::from("guests/adder/adder.wasm")
    }

    pub const fn ready_timeout_ms() -> u64 {
        5000
    }

    pub const fn poll_interval_ms() -> u64 {
        50
    }
}
