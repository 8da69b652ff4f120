//! The module host: lazy, single-flight initialization of the Wasm module.
//!
//! [`ModuleHost`] owns the only runtime instance of the process, the export
//! registry it publishes into, and the state machine that brings it up:
//!
//! ```text
//! Uninitialized -> Loading -> Instantiated -> WaitingForExports -> Ready
//!        ^            |             |                 |
//!        +------------+-------------+-----------------+--> Failed
//! ```
//!
//! Readiness is never stored. It is recomputed on every access from the
//! runtime slot, the runtime task's liveness and the registry. Any failure
//! clears the slot and the registry entries of the failed generation, so the
//! next call to [`ModuleHost::ensure_ready`] starts from scratch. Callers
//! that queued behind a failed attempt get that attempt's error instead of
//! starting another one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use calc_bridge_common::{
    CallError, ExecutionConfig, InitError, ModuleConfig, RunMode, RuntimeConfig,
};

use crate::abi::{ArgValue, GuestReturn};
use crate::bridge::{BridgeLoader, ImportSurface};
use crate::registry::ExportRegistry;
use crate::runtime::{InstantiatedModule, RuntimeInstance, RuntimeParts};
use crate::store::{GuestLogs, LogEntry};
use crate::{CompiledModule, WasmEngine};

/// Where the module host is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// Nothing loaded.
    Uninitialized,
    /// Reading the manifest and the module bytes.
    Loading,
    /// Module instantiated; entry point not started.
    Instantiated,
    /// Entry point running; waiting for the export.
    WaitingForExports,
    /// Export registered and runtime alive.
    Ready,
    /// The last attempt failed, or the runtime died.
    Failed,
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModuleState::Uninitialized => "uninitialized",
            ModuleState::Loading => "loading",
            ModuleState::Instantiated => "instantiated",
            ModuleState::WaitingForExports => "waiting_for_exports",
            ModuleState::Ready => "ready",
            ModuleState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The runtime currently serving calls.
struct ActiveRuntime {
    runtime: RuntimeInstance,
    export: String,
}

/// Owner of the process-wide Wasm module.
pub struct ModuleHost {
    engine: WasmEngine,
    surface: Arc<dyn ImportSurface>,
    loader: BridgeLoader,
    module_config: ModuleConfig,
    execution: ExecutionConfig,
    mode: RunMode,

    registry: Arc<ExportRegistry>,
    logs: Arc<GuestLogs>,

    /// Runtime slot; only written while `init_lock` is held.
    slot: RwLock<Option<ActiveRuntime>>,
    /// Last recorded transition, for diagnostics.
    phase: Mutex<ModuleState>,
    /// Serializes initialization and reset.
    init_lock: tokio::sync::Mutex<()>,
    /// Error of the last completed attempt, `None` if it succeeded.
    last_failure: Mutex<Option<InitError>>,

    generation: AtomicU64,
    initializations: AtomicU64,
    /// Attempts that ran to completion, successful or not.
    completed: AtomicU64,
}

impl ModuleHost {
    /// Create a host. Nothing is loaded until the first
    /// [`ensure_ready`](Self::ensure_ready).
    pub fn new(engine: WasmEngine, config: &RuntimeConfig, surface: Arc<dyn ImportSurface>) -> Self {
        let loader = BridgeLoader::new(
            config.module.bootstrap_path.clone(),
            config.module.binary_path.clone(),
        );

        Self {
            engine,
            surface,
            loader,
            module_config: config.module.clone(),
            execution: config.execution.clone(),
            mode: config.mode,
            registry: Arc::new(ExportRegistry::new()),
            logs: Arc::new(GuestLogs::new()),
            slot: RwLock::new(None),
            phase: Mutex::new(ModuleState::Uninitialized),
            init_lock: tokio::sync::Mutex::new(()),
            last_failure: Mutex::new(None),
            generation: AtomicU64::new(0),
            initializations: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        }
    }

    /// Returns `true` if the runtime is alive and its export is registered.
    pub fn is_ready(&self) -> bool {
        let slot = self.slot.read();
        slot.as_ref().is_some_and(|active| {
            active.runtime.is_running()
                && self
                    .registry
                    .contains(&active.export, active.runtime.generation())
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ModuleState {
        if self.is_ready() {
            return ModuleState::Ready;
        }
        match *self.phase.lock() {
            // Recorded as ready but no longer callable: the runtime died.
            ModuleState::Ready => ModuleState::Failed,
            other => other,
        }
    }

    /// Make sure the module is ready, initializing it if needed.
    ///
    /// Concurrent callers share one initialization: the first caller runs it
    /// while the others wait, then take its outcome.
    ///
    /// # Errors
    ///
    /// Returns the [`InitError`] of the attempt this caller ran or waited on.
    /// The host is left uninitialized so the next call retries.
    pub async fn ensure_ready(&self) -> Result<(), InitError> {
        if self.is_ready() {
            return Ok(());
        }

        let seen = self.completed.load(Ordering::SeqCst);
        let _guard = self.init_lock.lock().await;

        // Another caller may have finished while we waited.
        if self.is_ready() {
            return Ok(());
        }
        let shared = if self.completed.load(Ordering::SeqCst) == seen {
            None
        } else {
            self.last_failure.lock().clone()
        };
        if let Some(e) = shared {
            debug!(error = %e, "Sharing the failure of the attempt we waited on");
            return Err(e);
        }

        if self.clear_slot() {
            debug!("Dropped a runtime that is no longer callable");
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut attempt = Attempt::new(self, generation);
        let result = self.initialize(generation).await;
        attempt.disarm();

        let outcome = match result {
            Ok(active) => {
                info!(
                    instance_id = %active.runtime.id(),
                    generation,
                    export = %active.export,
                    "Module ready"
                );
                *self.slot.write() = Some(active);
                self.set_phase(ModuleState::Ready);
                *self.last_failure.lock() = None;
                Ok(())
            }
            Err(e) => {
                self.registry.remove_generation(generation);
                self.set_phase(ModuleState::Failed);
                warn!(generation, error = %e, "Module initialization failed");
                *self.last_failure.lock() = Some(e.clone());
                Err(e)
            }
        };
        self.completed.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    #[instrument(skip(self))]
    async fn initialize(&self, generation: u64) -> Result<ActiveRuntime, InitError> {
        let previous = self.initializations.fetch_add(1, Ordering::SeqCst);
        if previous > 0 && self.mode.is_development() {
            info!(
                attempt = previous + 1,
                binary = %self.loader.binary_path().display(),
                "Reloading Wasm module"
            );
        }

        self.set_phase(ModuleState::Loading);
        let loaded = self.loader.load().await?;
        let module = CompiledModule::from_source(self.engine.inner(), &loaded.binary)?;

        let instantiated = InstantiatedModule::instantiate(RuntimeParts {
            engine: &self.engine,
            constructor: &loaded.constructor,
            module: &module,
            surface: &*self.surface,
            execution: &self.execution,
            registry: Arc::clone(&self.registry),
            logs: Arc::clone(&self.logs),
            generation,
        })
        .await?;
        self.set_phase(ModuleState::Instantiated);

        let mut runtime = instantiated.start();
        self.set_phase(ModuleState::WaitingForExports);

        let export = loaded.constructor.spec().export.clone();
        self.wait_for_export(&mut runtime, &export).await?;

        Ok(ActiveRuntime { runtime, export })
    }

    /// Wait until `runtime` registers `export`.
    ///
    /// Woken by registry notifications, with a fixed-interval poll as a
    /// fallback. Gives up at the readiness timeout or when the runtime task
    /// ends.
    async fn wait_for_export(
        &self,
        runtime: &mut RuntimeInstance,
        export: &str,
    ) -> Result<(), InitError> {
        let started = Instant::now();
        let deadline = started + self.module_config.ready_timeout();

        let mut ticker = tokio::time::interval(self.module_config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let notified = self.registry.notified();

            if !runtime.is_running() {
                let reason = runtime.exit_reason().await;
                return Err(InitError::early_exit(reason));
            }
            if self.registry.contains(export, runtime.generation()) {
                debug!(
                    export,
                    waited_ms = started.elapsed().as_millis(),
                    "Export registered"
                );
                return Ok(());
            }

            tokio::select! {
                () = notified => {}
                _ = ticker.tick() => {}
                () = tokio::time::sleep_until(deadline) => {
                    if runtime.is_running() && self.registry.contains(export, runtime.generation()) {
                        return Ok(());
                    }
                    return Err(InitError::Timeout {
                        export: export.to_string(),
                        waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    });
                }
            }
        }
    }

    /// Call the module's export with arbitrary arguments.
    ///
    /// Does not initialize the module; call [`ensure_ready`](Self::ensure_ready)
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::NotReady`] if there is nothing to call, or the
    /// failure of the call itself. A guest that rejects its input is not an
    /// error: it answers [`GuestReturn::Error`].
    ///
    /// A call that times out terminates the runtime, so the next
    /// [`ensure_ready`](Self::ensure_ready) starts a fresh one.
    pub async fn call(&self, args: Vec<ArgValue>) -> Result<GuestReturn, CallError> {
        let handle = {
            let slot = self.slot.read();
            let active = slot.as_ref().ok_or(CallError::NotReady)?;
            if !active.runtime.is_running() {
                return Err(CallError::NotReady);
            }
            self.registry
                .get_current(&active.export, active.runtime.generation())
                .ok_or(CallError::NotReady)?
        };

        match tokio::time::timeout(self.execution.call_timeout(), handle.call(args)).await {
            Ok(result) => result,
            Err(_) => {
                self.terminate_generation(handle.generation());
                Err(CallError::Timeout {
                    duration_ms: self.execution.call_timeout_ms,
                })
            }
        }
    }

    /// Terminate the runtime of `generation` if it is still in the slot.
    fn terminate_generation(&self, generation: u64) {
        let slot = self.slot.read();
        if let Some(active) = slot
            .as_ref()
            .filter(|active| active.runtime.generation() == generation)
        {
            active.runtime.terminate();
            self.registry.remove_generation(generation);
        }
    }

    /// Call the module's export with two numbers.
    pub async fn invoke(&self, a: f64, b: f64) -> Result<GuestReturn, CallError> {
        self.call(vec![ArgValue::Number(a), ArgValue::Number(b)])
            .await
    }

    /// Drop the current runtime, if any.
    ///
    /// Waits for an in-flight initialization to finish first. Returns `true`
    /// if a runtime was dropped.
    pub async fn reset(&self) -> bool {
        let _guard = self.init_lock.lock().await;
        let dropped = self.clear_slot();
        self.set_phase(ModuleState::Uninitialized);
        info!(dropped, "Module host reset");
        dropped
    }

    fn clear_slot(&self) -> bool {
        let old = self.slot.write().take();
        match old {
            Some(active) => {
                self.registry.remove_generation(active.runtime.generation());
                true
            }
            None => false,
        }
    }

    fn set_phase(&self, state: ModuleState) {
        let mut phase = self.phase.lock();
        debug!(from = %*phase, to = %state, "Module state transition");
        *phase = state;
    }

    /// Number of initialization attempts started so far.
    pub fn initializations(&self) -> u64 {
        self.initializations.load(Ordering::SeqCst)
    }

    /// Identifier of the current runtime instance.
    pub fn runtime_id(&self) -> Option<String> {
        self.slot
            .read()
            .as_ref()
            .map(|active| active.runtime.id().to_string())
    }

    /// Recent guest log lines, oldest first.
    pub fn guest_logs(&self) -> Vec<LogEntry> {
        self.logs.snapshot()
    }

    /// The export registry.
    pub fn registry(&self) -> &ExportRegistry {
        &self.registry
    }

    /// Module location and wait settings.
    pub fn module_config(&self) -> &ModuleConfig {
        &self.module_config
    }

    /// Process mode.
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// The shared engine.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }
}

/// Records an initialization attempt that never finished.
///
/// The attempt's future can be dropped mid-way, for example when the request
/// driving it is cancelled. The runtime it was building goes with it; this
/// guard makes the host report `Failed` instead of a stale phase.
struct Attempt<'a> {
    host: &'a ModuleHost,
    generation: u64,
    armed: bool,
}

impl<'a> Attempt<'a> {
    fn new(host: &'a ModuleHost, generation: u64) -> Self {
        Self {
            host,
            generation,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.host.registry.remove_generation(self.generation);
            self.host.set_phase(ModuleState::Failed);
            warn!(generation = self.generation, "Module initialization abandoned");
        }
    }
}

impl std::fmt::Debug for ModuleHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHost")
            .field("state", &self.state())
            .field("initializations", &self.initializations())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use wasmtime::Linker;

    use super::*;
    use crate::bridge::ImportRequirements;
    use crate::store::HostContext;
    use calc_bridge_common::EngineConfig;

    struct NoImports;

    impl ImportSurface for NoImports {
        fn link(
            &self,
            _linker: &mut Linker<HostContext>,
            _requirements: &ImportRequirements,
        ) -> Result<(), InitError> {
            Ok(())
        }
    }

    fn host(config: &RuntimeConfig) -> ModuleHost {
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
        ModuleHost::new(engine, config, Arc::new(NoImports))
    }

    #[test]
    fn test_initial_state() {
        let host = host(&RuntimeConfig::default());

        assert!(!host.is_ready());
        assert_eq!(host.state(), ModuleState::Uninitialized);
        assert_eq!(host.initializations(), 0);
        assert!(host.runtime_id().is_none());
    }

    #[tokio::test]
    async fn test_call_before_ready() {
        let host = host(&RuntimeConfig::default());

        let err = host.invoke(1.0, 2.0).await.unwrap_err();
        assert!(matches!(err, CallError::NotReady));
    }

    #[tokio::test]
    async fn test_missing_files_fail_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig {
            module: ModuleConfig::new(dir.path().join("bridge.toml"), dir.path().join("m.wasm")),
            ..Default::default()
        };
        let host = host(&config);

        let err = host.ensure_ready().await.unwrap_err();
        assert!(matches!(err, InitError::Io { .. }));
        assert_eq!(host.state(), ModuleState::Failed);
        assert!(host.runtime_id().is_none());

        // Each call makes exactly one fresh attempt.
        assert!(host.ensure_ready().await.is_err());
        assert_eq!(host.initializations(), 2);
    }

    #[tokio::test]
    async fn test_reset_without_runtime() {
        let host = host(&RuntimeConfig::default());
        assert!(!host.reset().await);
        assert_eq!(host.state(), ModuleState::Uninitialized);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ModuleState::WaitingForExports.to_string(), "waiting_for_exports");
        assert_eq!(ModuleState::Ready.to_string(), "ready");
    }
}
