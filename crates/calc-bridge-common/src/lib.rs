//! Common types, errors, and configuration for calc-bridge.
//!
//! This crate provides shared functionality used across the workspace:
//! - Error types using `thiserror` for the initialization and call paths
//! - Configuration structures for the engine, execution limits and module paths
//! - The TOML configuration file format

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{EngineConfig, ExecutionConfig, ModuleConfig, RunMode, RuntimeConfig};
pub use config_file::{AdminConfig, ConfigFile, ConfigFileError, ServerConfigFile};
pub use error::{CallError, InitError, RuntimeError};
