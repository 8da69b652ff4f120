//! Host function registration for Wasmtime linkers.
//!
//! This module provides [`HostImports`], which defines the imports a bridge
//! manifest asks for on the runtime's linker.

use calc_bridge_common::InitError;
use calc_bridge_core::{HostContext, ImportRequirements, ImportSurface};
use tracing::warn;
use wasmtime::{Caller, Extern, Linker};

use crate::logging::{LoggingHost, level_from_i32};

/// Status returned by `register_export` on success.
const REGISTER_OK: i32 = 0;
/// The name could not be read from guest memory.
const REGISTER_BAD_NAME: i32 = -1;
/// The name does not refer to an exported function.
const REGISTER_NOT_A_FUNC: i32 = -2;

/// The standard host import surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostImports;

impl ImportSurface for HostImports {
    fn link(
        &self,
        linker: &mut Linker<HostContext>,
        requirements: &ImportRequirements,
    ) -> Result<(), InitError> {
        register_export_fn(linker, &requirements.module)?;
        if requirements.log {
            register_logging(linker, &requirements.module)?;
        }
        if requirements.wasi {
            register_wasi(linker)?;
        }
        Ok(())
    }
}

/// Register the `register_export` host function.
///
/// Registers `<module>::register_export(ptr: i32, len: i32) -> i32`. The guest
/// passes the UTF-8 name of one of its exported functions; the host
/// publishes it into the export registry.
///
/// Returns 0 on success, -1 if the name cannot be read, -2 if the module has
/// no exported function by that name.
pub fn register_export_fn(
    linker: &mut Linker<HostContext>,
    module: &str,
) -> Result<(), InitError> {
    linker
        .func_wrap(
            module,
            "register_export",
            |mut caller: Caller<'_, HostContext>, ptr: i32, len: i32| -> i32 {
                let Some(name) = read_guest_str(&mut caller, ptr, len) else {
                    return REGISTER_BAD_NAME;
                };

                let is_func = caller
                    .get_export(&name)
                    .and_then(Extern::into_func)
                    .is_some();
                if !is_func {
                    warn!(export = %name, "Guest registered a name that is not an exported function");
                    return REGISTER_NOT_A_FUNC;
                }

                caller.data().exports().publish(&name);
                REGISTER_OK
            },
        )
        .map_err(|e| {
            InitError::instantiation(format!("Failed to register register_export function: {e}"))
        })?;

    Ok(())
}

/// Register the logging host function.
///
/// Registers `<module>::log(level: i32, ptr: i32, len: i32)` which allows guest
/// code to emit logs at various levels (debug, info, warn, error).
///
/// # Memory Protocol
///
/// The guest passes:
/// - `level`: Log level (0=debug, 1=info, 2=warn, 3=error)
/// - `ptr`: Pointer to the message string in guest memory
/// - `len`: Length of the message in bytes (UTF-8)
pub fn register_logging(linker: &mut Linker<HostContext>, module: &str) -> Result<(), InitError> {
    linker
        .func_wrap(
            module,
            "log",
            |mut caller: Caller<'_, HostContext>, level: i32, ptr: i32, len: i32| {
                let Some(message) = read_guest_str(&mut caller, ptr, len) else {
                    return;
                };
                LoggingHost::log(caller.data(), level_from_i32(level), &message);
            },
        )
        .map_err(|e| {
            InitError::instantiation(format!("Failed to register log function: {e}"))
        })?;

    Ok(())
}

/// Register the WASI preview1 imports.
pub fn register_wasi(linker: &mut Linker<HostContext>) -> Result<(), InitError> {
    wasmtime_wasi::preview1::add_to_linker_async(linker, HostContext::wasi_mut)
        .map_err(|e| InitError::instantiation(format!("Failed to register WASI imports: {e}")))
}

/// Read a UTF-8 string out of the caller's exported memory.
///
/// Returns `None` (after logging why) if the range is invalid.
fn read_guest_str(caller: &mut Caller<'_, HostContext>, ptr: i32, len: i32) -> Option<String> {
    let (Ok(start), Ok(len)) = (usize::try_from(ptr), usize::try_from(len)) else {
        warn!(
            ptr = ptr,
            len = len,
            "Invalid pointer or length (negative value)"
        );
        return None;
    };

    let Some(memory) = caller.get_export("memory").and_then(Extern::into_memory) else {
        warn!("Memory export not found in guest module");
        return None;
    };

    let data = memory.data(&*caller);
    let Some(end) = start.checked_add(len) else {
        warn!(ptr = ptr, len = len, "Pointer + length overflow");
        return None;
    };

    if end > data.len() {
        warn!(
            start = start,
            end = end,
            memory_size = data.len(),
            "Memory access out of bounds"
        );
        return None;
    }

    Some(String::from_utf8_lossy(&data[start..end]).into_owned())
}
