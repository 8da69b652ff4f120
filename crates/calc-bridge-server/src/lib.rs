//! HTTP server for calc-bridge.
//!
//! This crate exposes the module host over HTTP. It handles:
//!
//! - `POST /calculate`: validate, initialize the module on demand, call it
//! - Health and readiness checks
//! - An optional token-protected Admin API (status, forced reset)
//!
//! # Quick Start
//!
//! ```ignore
//! use calc_bridge_server::{CalcServer, ServerConfig};
//! use calc_bridge_common::RuntimeConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime_config = RuntimeConfig::default();
//!     let server_config = ServerConfig::default();
//!
//!     let server = CalcServer::new(&runtime_config, server_config)?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod handler;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod state;

pub use router::AdminRouterConfig;
pub use server::{CalcServer, ServerConfig, TestHandle};
pub use state::AppState;
