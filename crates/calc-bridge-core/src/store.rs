//! Store state for the long-lived runtime instance.
//!
//! This module provides:
//! - [`HostContext`]: State host imports reach through [`wasmtime::Caller`]
//! - [`ExportSink`]: How a guest publishes exports into the registry
//! - [`GuestLogs`], [`LogEntry`] and [`LogLevel`]: Bounded guest log capture

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use wasmtime::Store;
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::WasmEngine;
use crate::registry::{ExportHandle, ExportRegistry, Invocation};
use calc_bridge_common::{ExecutionConfig, InitError};

/// Guest log entries kept for diagnostics.
const LOG_CAPACITY: usize = 128;

/// Per-instance host state.
///
/// One `HostContext` lives inside the store of each runtime instance, for as
/// long as that instance runs.
pub struct HostContext {
    /// WASI preview1 context, linked only when the manifest asks for it.
    wasi: WasiP1Ctx,

    /// Identifier of the runtime instance, for tracing.
    pub instance_id: String,

    /// Where guest log lines are kept.
    logs: Arc<GuestLogs>,

    /// Where guest exports are published.
    exports: ExportSink,
}

impl HostContext {
    /// Create a new host context.
    pub fn new(instance_id: String, logs: Arc<GuestLogs>, exports: ExportSink) -> Self {
        let wasi = WasiCtxBuilder::new()
            .inherit_stdout()
            .inherit_stderr()
            .build_p1();

        Self {
            wasi,
            instance_id,
            logs,
            exports,
        }
    }

    /// Record a guest log line.
    pub fn log(&self, level: LogLevel, message: String) {
        self.logs.push(LogEntry {
            level,
            message,
            timestamp: Instant::now(),
        });
    }

    /// The export sink for this instance.
    pub fn exports(&self) -> &ExportSink {
        &self.exports
    }

    /// The WASI preview1 context.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }
}

/// Publishes guest exports into the shared registry.
#[derive(Debug, Clone)]
pub struct ExportSink {
    registry: Arc<ExportRegistry>,
    generation: u64,
    tx: mpsc::Sender<Invocation>,
}

impl ExportSink {
    /// Create a sink for the runtime instance of `generation`.
    pub fn new(registry: Arc<ExportRegistry>, generation: u64, tx: mpsc::Sender<Invocation>) -> Self {
        Self {
            registry,
            generation,
            tx,
        }
    }

    /// Publish `name` as callable through this instance.
    pub fn publish(&self, name: &str) {
        self.registry
            .register(ExportHandle::new(name, self.generation, self.tx.clone()));
    }

    /// Generation of the owning runtime instance.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// A single log entry from guest code.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Log level (debug, info, warn, error).
    pub level: LogLevel,

    /// Log message content.
    pub message: String,

    /// When the log was recorded.
    pub timestamp: Instant,
}

/// Log level for guest logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug-level messages.
    Debug,
    /// Informational messages.
    Info,
    /// Warning messages.
    Warn,
    /// Error messages.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Bounded buffer of recent guest log lines, shared with the module host.
#[derive(Debug, Default)]
pub struct GuestLogs {
    entries: Mutex<VecDeque<LogEntry>>,
}

impl GuestLogs {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, evicting the oldest one when full.
    pub fn push(&self, entry: LogEntry) {
        let mut entries = self.entries.lock();
        if entries.len() == LOG_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Copy out the current entries, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if no entries are held.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Fuel consumed between cooperative yields to the async executor.
///
/// Keeps a runaway guest interruptible by tokio timeouts and task aborts even
/// when its fuel budget is effectively unlimited.
pub const FUEL_YIELD_INTERVAL: u64 = 10_000;

/// Create a new Wasmtime store around `context`.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn create_store(
    engine: &WasmEngine,
    config: &ExecutionConfig,
    context: HostContext,
) -> Result<Store<HostContext>, InitError> {
    let mut store = Store::new(engine.inner(), context);
    refuel(&mut store, config)
        .map_err(|e| InitError::instantiation(format!("Failed to set fuel: {e}")))?;
    store
        .fuel_async_yield_interval(Some(FUEL_YIELD_INTERVAL))
        .map_err(|e| InitError::instantiation(format!("Failed to set yield interval: {e}")))?;
    Ok(store)
}

/// Reset the store's fuel to the per-call budget.
///
/// With metering disabled in the config the store still consumes fuel, so it
/// gets an effectively unlimited budget.
pub fn refuel(store: &mut Store<HostContext>, config: &ExecutionConfig) -> wasmtime::Result<()> {
    let fuel = if config.fuel_metering {
        config.max_fuel
    } else {
        u64::MAX
    };
    store.set_fuel(fuel)
}
