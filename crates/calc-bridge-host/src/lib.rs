//! Host functions for calc-bridge guest modules.
//!
//! This crate provides the host side of the imports a bridge manifest can
//! ask for. [`HostImports`] implements
//! [`ImportSurface`](calc_bridge_core::ImportSurface) and links:
//!
//! - `register_export(ptr, len) -> i32`: publish a guest export (always)
//! - [`logging`]: `log(level, ptr, len)` for guest diagnostics (optional)
//! - WASI preview1 (optional), for toolchains that need it

pub mod linker;
pub mod logging;

pub use linker::HostImports;
pub use logging::LoggingHost;
