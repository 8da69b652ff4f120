//! Runtime instance lifecycle.
//!
//! A runtime instance goes through two steps:
//!
//! 1. [`InstantiatedModule::instantiate`] links the module against the
//!    runtime's import surface and instantiates it. Nothing runs yet.
//! 2. [`InstantiatedModule::start`] moves the store into a background task.
//!    The task runs the entry point (where the guest registers its exports),
//!    then parks on an invocation channel and serves calls until it is
//!    aborted or a call traps.
//!
//! The task's output is the reason it stopped; the module host reads it when
//! the task ends before the export shows up.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};
use uuid::Uuid;
use wasmtime::{Instance, Memory, Store, Trap};

use calc_bridge_common::{CallError, ExecutionConfig, InitError};

use crate::abi::{
    EXCHANGE_SIZE, GuestReturn, Status, decode_message_ref, decode_status, decode_value,
    encode_args,
};
use crate::bridge::{ImportSurface, RuntimeConstructor, RuntimeSpec};
use crate::registry::{ExportRegistry, Invocation};
use crate::store::{ExportSink, GuestLogs, HostContext, create_store, refuel};
use crate::{CompiledModule, WasmEngine};

/// Pending invocations per runtime instance.
const INVOCATION_QUEUE: usize = 64;

/// Everything needed to instantiate one runtime.
pub struct RuntimeParts<'a> {
    /// Shared engine.
    pub engine: &'a WasmEngine,
    /// Runtime constructor from the bridge manifest.
    pub constructor: &'a RuntimeConstructor,
    /// The compiled module.
    pub module: &'a CompiledModule,
    /// Host capabilities.
    pub surface: &'a dyn ImportSurface,
    /// Per-call limits.
    pub execution: &'a ExecutionConfig,
    /// Namespace exports are published into.
    pub registry: Arc<ExportRegistry>,
    /// Guest log buffer.
    pub logs: Arc<GuestLogs>,
    /// Generation number of this instance.
    pub generation: u64,
}

/// A module that is instantiated but not yet running.
pub struct InstantiatedModule {
    id: String,
    generation: u64,
    store: Store<HostContext>,
    instance: Instance,
    spec: RuntimeSpec,
    execution: ExecutionConfig,
    rx: mpsc::Receiver<Invocation>,
}

impl InstantiatedModule {
    /// Link and instantiate the module.
    ///
    /// # Errors
    ///
    /// Returns [`InitError::Instantiation`] if the module lacks an export the
    /// runtime needs or imports something the host does not provide.
    #[instrument(skip(parts), fields(generation = parts.generation))]
    pub async fn instantiate(parts: RuntimeParts<'_>) -> Result<Self, InitError> {
        let spec = parts.constructor.spec().clone();

        if parts.module.as_module().get_export("memory").is_none() {
            return Err(InitError::instantiation("module does not export 'memory'"));
        }
        for name in [&spec.entry_point, &spec.export, &spec.exchange] {
            if !parts.module.exports_func(name) {
                return Err(InitError::instantiation(format!(
                    "module does not export function '{name}'"
                )));
            }
        }

        let linker = parts.constructor.build_linker(parts.engine, parts.surface)?;

        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(INVOCATION_QUEUE);
        let sink = ExportSink::new(parts.registry, parts.generation, tx);
        let context = HostContext::new(id.clone(), parts.logs, sink);
        let mut store = create_store(parts.engine, parts.execution, context)?;

        let instance = linker
            .instantiate_async(&mut store, parts.module.as_module())
            .await
            .map_err(|e| InitError::instantiation(e.to_string()))?;

        debug!(instance_id = %id, "Module instantiated");

        Ok(Self {
            id,
            generation: parts.generation,
            store,
            instance,
            spec,
            execution: parts.execution.clone(),
            rx,
        })
    }

    /// Identifier of this instance.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run the entry point in the background and start serving calls.
    pub fn start(self) -> RuntimeInstance {
        let span = info_span!("runtime", instance_id = %self.id, generation = self.generation);
        let id = self.id.clone();
        let generation = self.generation;

        let task = tokio::spawn(
            run(
                self.store,
                self.instance,
                self.spec,
                self.execution,
                self.rx,
            )
            .instrument(span),
        );

        RuntimeInstance {
            id,
            generation,
            task,
            terminated: AtomicBool::new(false),
        }
    }
}

/// A running runtime instance.
///
/// Dropping it aborts the background task.
#[derive(Debug)]
pub struct RuntimeInstance {
    id: String,
    generation: u64,
    task: JoinHandle<String>,
    terminated: AtomicBool,
}

impl RuntimeInstance {
    /// Identifier of this instance.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Generation number of this instance.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `true` while the background task is alive and has not been
    /// terminated.
    pub fn is_running(&self) -> bool {
        !self.terminated.load(Ordering::Acquire) && !self.task.is_finished()
    }

    /// Stop the background task.
    ///
    /// The instance reports not running from here on, even though the task
    /// only ends at the guest's next yield point.
    pub fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::AcqRel) {
            warn!(instance_id = %self.id, "Terminating runtime instance");
        }
        self.task.abort();
    }

    /// Wait for the background task to end and report why it stopped.
    pub async fn exit_reason(&mut self) -> String {
        match (&mut self.task).await {
            Ok(reason) => reason,
            Err(e) if e.is_cancelled() => "runtime task was cancelled".to_string(),
            Err(e) => format!("runtime task panicked: {e}"),
        }
    }
}

impl Drop for RuntimeInstance {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Where arguments and results are exchanged.
#[derive(Clone, Copy)]
struct Exchange {
    memory: Memory,
    ptr: usize,
}

async fn run(
    mut store: Store<HostContext>,
    instance: Instance,
    spec: RuntimeSpec,
    execution: ExecutionConfig,
    mut rx: mpsc::Receiver<Invocation>,
) -> String {
    let entry = match instance.get_typed_func::<(), ()>(&mut store, &spec.entry_point) {
        Ok(f) => f,
        Err(e) => return stopped(format!("entry point '{}': {e}", spec.entry_point)),
    };

    if let Err(e) = entry.call_async(&mut store, ()).await {
        return stopped(format!("entry point trapped: {}", classify_trap(&e)));
    }

    let exchange = match resolve_exchange(&mut store, &instance, &spec, &execution).await {
        Ok(x) => x,
        Err(e) => return stopped(e.to_string()),
    };

    info!("Entry point returned, serving calls");

    while let Some(invocation) = rx.recv().await {
        let result = call_export(&mut store, &instance, exchange, &execution, &invocation).await;

        let fatal = matches!(result, Err(CallError::Trap { .. } | CallError::FuelExhausted));
        if let Err(ref e) = result {
            warn!(export = %invocation.export, error = %e, "Call failed");
        }
        let _ = invocation.reply.send(result);

        if fatal {
            return stopped("a call trapped; instance state is no longer trusted".to_string());
        }
    }

    "invocation channel closed".to_string()
}

fn stopped(reason: String) -> String {
    error!(reason = %reason, "Runtime instance stopped");
    reason
}

async fn resolve_exchange(
    store: &mut Store<HostContext>,
    instance: &Instance,
    spec: &RuntimeSpec,
    execution: &ExecutionConfig,
) -> Result<Exchange, CallError> {
    let memory = instance
        .get_memory(&mut *store, "memory")
        .ok_or_else(|| CallError::abi("module does not export 'memory'"))?;

    let func = instance
        .get_typed_func::<(), i32>(&mut *store, &spec.exchange)
        .map_err(|e| CallError::abi(format!("'{}' is not fn() -> i32: {e}", spec.exchange)))?;

    refuel(store, execution).map_err(|e| CallError::abi(e.to_string()))?;
    let ptr = func
        .call_async(&mut *store, ())
        .await
        .map_err(|e| classify_trap(&e))?;

    let ptr = usize::try_from(ptr).map_err(|_| CallError::abi("negative exchange pointer"))?;
    if ptr + EXCHANGE_SIZE > memory.data_size(&*store) {
        return Err(CallError::abi("exchange area lies outside linear memory"));
    }

    Ok(Exchange { memory, ptr })
}

async fn call_export(
    store: &mut Store<HostContext>,
    instance: &Instance,
    exchange: Exchange,
    execution: &ExecutionConfig,
    invocation: &Invocation,
) -> Result<GuestReturn, CallError> {
    let func = instance
        .get_typed_func::<i32, i32>(&mut *store, &invocation.export)
        .map_err(|e| {
            CallError::abi(format!("'{}' is not fn(i32) -> i32: {e}", invocation.export))
        })?;

    let (args, argc) = encode_args(&invocation.args)?;
    exchange
        .memory
        .write(&mut *store, exchange.ptr, &args)
        .map_err(|e| CallError::abi(format!("writing arguments: {e}")))?;

    refuel(store, execution).map_err(|e| CallError::abi(e.to_string()))?;
    let status = func
        .call_async(&mut *store, argc)
        .await
        .map_err(|e| classify_trap(&e))?;

    let mut head = [0u8; 8];
    exchange
        .memory
        .read(&*store, exchange.ptr, &mut head)
        .map_err(|e| CallError::abi(format!("reading result: {e}")))?;

    match decode_status(status)? {
        Status::Ok => Ok(GuestReturn::Value(decode_value(&head))),
        Status::Rejected => {
            let (ptr, len) = decode_message_ref(&head)?;
            let mut message = vec![0u8; len];
            exchange
                .memory
                .read(&*store, ptr, &mut message)
                .map_err(|e| CallError::abi(format!("reading error message: {e}")))?;
            Ok(GuestReturn::Error(
                String::from_utf8_lossy(&message).into_owned(),
            ))
        }
    }
}

/// Map a Wasmtime error to a call error.
fn classify_trap(error: &wasmtime::Error) -> CallError {
    if error
        .downcast_ref::<Trap>()
        .is_some_and(|trap| *trap == Trap::OutOfFuel)
    {
        return CallError::FuelExhausted;
    }
    CallError::trap(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_plain_error() {
        let err = wasmtime::Error::msg("boom");
        assert!(matches!(classify_trap(&err), CallError::Trap { .. }));
    }

    #[test]
    fn test_classify_out_of_fuel() {
        let err = wasmtime::Error::new(Trap::OutOfFuel);
        assert!(matches!(classify_trap(&err), CallError::FuelExhausted));
    }
}
