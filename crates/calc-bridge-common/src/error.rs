//! Error types for calc-bridge.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`InitError`]: Failures while bringing the Wasm module to the ready state
//! - [`CallError`]: Failures while invoking the module's exported function
//! - [`RuntimeError`]: Top-level errors (engine, configuration, server)

use std::io;

use thiserror::Error;

/// Errors raised by the module initialization sequence.
///
/// Every variant resets the module host to its uninitialized state, so the
/// next request starts a fresh attempt.
#[derive(Error, Debug)]
pub enum InitError {
    /// The bootstrap manifest or the module binary could not be read.
    #[error("Failed to read '{path}': {source}")]
    Io {
        /// Path of the file that could not be read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The bootstrap manifest does not define a usable runtime constructor.
    #[error("Bootstrap failed: {reason}")]
    Bootstrap {
        /// Description of what is wrong with the manifest.
        reason: String,
    },

    /// The module bytes are not valid WebAssembly (or WAT).
    #[error("Compilation failed: {reason}")]
    Compilation {
        /// Description of the compilation failure.
        reason: String,
    },

    /// The compiled module does not fit the runtime's import requirements.
    #[error("Instantiation failed: {reason}")]
    Instantiation {
        /// Description of the instantiation failure.
        reason: String,
    },

    /// The module never registered its export within the wait budget.
    #[error("Export '{export}' was not registered within {waited_ms}ms")]
    Timeout {
        /// Name of the export that was awaited.
        export: String,
        /// How long the initializer waited.
        waited_ms: u64,
    },

    /// The module's entry point stopped before registering its export.
    #[error("Module terminated during startup: {reason}")]
    EarlyExit {
        /// Why the background task ended.
        reason: String,
    },
}

/// Errors raised when calling the module's exported function.
///
/// A guest-side validation failure is not an error here; it is reported as a
/// regular return value by the ABI layer.
#[derive(Error, Debug)]
pub enum CallError {
    /// The module is not ready to accept calls.
    #[error("Module is not ready")]
    NotReady,

    /// The module's background task ended before answering.
    #[error("Module terminated before answering the call")]
    Terminated,

    /// The guest trapped while executing the call.
    #[error("Wasm trap: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
    },

    /// The call exhausted its fuel budget.
    #[error("Fuel exhausted: CPU limit exceeded")]
    FuelExhausted,

    /// The call did not complete in time.
    #[error("Call timeout after {duration_ms}ms")]
    Timeout {
        /// The timeout duration in milliseconds.
        duration_ms: u64,
    },

    /// The guest broke the calling convention (bad status, bad pointers).
    #[error("ABI violation: {reason}")]
    Abi {
        /// Description of the violation.
        reason: String,
    },
}

/// Top-level runtime errors.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Module initialization failed.
    #[error(transparent)]
    Init(#[from] InitError),

    /// Calling the exported function failed.
    #[error(transparent)]
    Call(#[from] CallError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

impl InitError {
    /// Create a new `Io` error for the given path.
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a new `Bootstrap` error.
    pub fn bootstrap(reason: impl Into<String>) -> Self {
        Self::Bootstrap {
            reason: reason.into(),
        }
    }

    /// Create a new `Compilation` error.
    pub fn compilation(reason: impl Into<String>) -> Self {
        Self::Compilation {
            reason: reason.into(),
        }
    }

    /// Create a new `Instantiation` error.
    pub fn instantiation(reason: impl Into<String>) -> Self {
        Self::Instantiation {
            reason: reason.into(),
        }
    }

    /// Create a new `EarlyExit` error.
    pub fn early_exit(reason: impl Into<String>) -> Self {
        Self::EarlyExit {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the export never showed up in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

// `io::Error` is not `Clone`; the copy keeps its kind and message.
impl Clone for InitError {
    fn clone(&self) -> Self {
        match self {
            Self::Io { path, source } => Self::Io {
                path: path.clone(),
                source: io::Error::new(source.kind(), source.to_string()),
            },
            Self::Bootstrap { reason } => Self::bootstrap(reason.clone()),
            Self::Compilation { reason } => Self::compilation(reason.clone()),
            Self::Instantiation { reason } => Self::instantiation(reason.clone()),
            Self::Timeout { export, waited_ms } => Self::Timeout {
                export: export.clone(),
                waited_ms: *waited_ms,
            },
            Self::EarlyExit { reason } => Self::early_exit(reason.clone()),
        }
    }
}

impl CallError {
    /// Create a new `Trap` error.
    pub fn trap(message: impl Into<String>) -> Self {
        Self::Trap {
            message: message.into(),
        }
    }

    /// Create a new `Abi` error.
    pub fn abi(reason: impl Into<String>) -> Self {
        Self::Abi {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the module could not take the call at all.
    ///
    /// These map to "service unavailable" rather than an internal error.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::NotReady | Self::Terminated)
    }
}

impl RuntimeError {
    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = InitError::io(
            "guests/adder/adder.wasm",
            io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        );
        assert_eq!(
            err.to_string(),
            "Failed to read 'guests/adder/adder.wasm': No such file or directory"
        );

        let err = InitError::Timeout {
            export: "add".into(),
            waited_ms: 5000,
        };
        assert_eq!(
            err.to_string(),
            "Export 'add' was not registered within 5000ms"
        );

        assert_eq!(
            CallError::FuelExhausted.to_string(),
            "Fuel exhausted: CPU limit exceeded"
        );
    }

    #[test]
    fn test_error_from_init() {
        let runtime_err: RuntimeError = InitError::bootstrap("missing [runtime]").into();
        assert!(matches!(runtime_err, RuntimeError::Init(_)));
        assert_eq!(runtime_err.to_string(), "Bootstrap failed: missing [runtime]");
    }

    #[test]
    fn test_is_unavailable() {
        assert!(CallError::NotReady.is_unavailable());
        assert!(CallError::Terminated.is_unavailable());
        assert!(!CallError::FuelExhausted.is_unavailable());
        assert!(!CallError::trap("unreachable").is_unavailable());
    }

    #[test]
    fn test_is_timeout() {
        let err = InitError::Timeout {
            export: "add".into(),
            waited_ms: 10,
        };
        assert!(err.is_timeout());
        assert!(!InitError::early_exit("trap").is_timeout());
    }

    #[test]
    fn test_init_error_clone_keeps_io_details() {
        let err = InitError::io(
            "adder.wasm",
            io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        );
        let copy = err.clone();

        assert_eq!(copy.to_string(), err.to_string());
        match copy {
            InitError::Io { source, .. } => assert_eq!(source.kind(), io::ErrorKind::NotFound),
            other => panic!("expected Io error, got {other:?}"),
        }
    }
}
