//! Wasmtime module host for calc-bridge.
//!
//! This crate brings one WebAssembly module to life on demand and bridges
//! its exported function into async Rust:
//! - [`WasmEngine`]: Configured Wasmtime engine
//! - [`BridgeLoader`]: Reads the bridge manifest and the module bytes
//! - [`CompiledModule`]: Compiled WebAssembly module wrapper
//! - [`RuntimeInstance`]: Background task that owns the store and serves calls
//! - [`ExportRegistry`]: Namespace the guest publishes its exports into
//! - [`ModuleHost`]: Single-flight initialization and the call surface
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      ModuleHost                         │
//! │  - ensure_ready(): load → instantiate → start → wait    │
//! │  - call()/invoke(): forwards to the registered export   │
//! └─────────────────────────────────────────────────────────┘
//!              │                              ▲
//!              ▼                              │ register_export
//! ┌────────────────────────────┐   ┌──────────────────────────┐
//! │      RuntimeInstance       │──▶│      ExportRegistry      │
//! │  (tokio task, owns Store)  │   │  name → ExportHandle     │
//! │  - entry point, then       │   │  + change notification   │
//! │    serves invocations      │   └──────────────────────────┘
//! └────────────────────────────┘
//! ```

pub mod abi;
pub mod bridge;
pub mod engine;
pub mod host;
pub mod module;
pub mod registry;
pub mod runtime;
pub mod store;

pub use abi::{ArgValue, GuestReturn};
pub use bridge::{BridgeLoader, ImportRequirements, ImportSurface, RuntimeConstructor};
pub use engine::WasmEngine;
pub use host::{ModuleHost, ModuleState};
pub use module::CompiledModule;
pub use registry::{ExportHandle, ExportRegistry};
pub use runtime::RuntimeInstance;
pub use store::{GuestLogs, HostContext, LogEntry, LogLevel};
