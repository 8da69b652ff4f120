//! calc-bridge CLI entry point.
//!
//! This is the main entry point for running the calc-bridge HTTP server.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use calc_bridge_common::{ConfigFile, RunMode};
use calc_bridge_server::{CalcServer, ServerConfig};

/// HTTP calculator backed by a lazily initialized WebAssembly module.
#[derive(Parser, Debug)]
#[command(name = "calc-bridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE", env = "CALC_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind to (overrides config file)
    #[arg(short = 'b', long = "bind-addr", value_name = "ADDR", env = "BIND_ADDR")]
    bind_addr: Option<SocketAddr>,

    /// Run mode: development or production (overrides config file)
    #[arg(short = 'm', long = "mode", value_name = "MODE", env = "CALC_BRIDGE_MODE")]
    mode: Option<RunMode>,

    /// Emit logs as JSON
    #[arg(long = "log-json", action = ArgAction::SetTrue)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_json);

    info!("Starting calc-bridge");

    let mut config = match &cli.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load config file '{}'", path.display()))?,
        None => ConfigFile::default(),
    };

    if let Some(mode) = cli.mode {
        config.runtime.mode = mode;
    }

    let mut server_config = ServerConfig::from_file(&config.server, &config.admin)
        .context("Invalid server configuration")?;
    if let Some(addr) = cli.bind_addr {
        server_config = server_config.with_bind_addr(addr);
    }

    info!(
        bind_addr = %server_config.bind_addr,
        mode = %config.runtime.mode,
        bootstrap = %config.runtime.module.bootstrap_path.display(),
        binary = %config.runtime.module.binary_path.display(),
        admin = server_config.admin.is_some(),
        "Configuration loaded"
    );

    let admin_prefix = server_config.admin.as_ref().map(|a| a.prefix.clone());
    let server = CalcServer::new(&config.runtime, server_config)?;

    info!("Server initialized. Available endpoints:");
    info!("  POST /calculate           - Add 'a' and 'b'");
    info!("  GET  /health              - Health check");
    info!("  GET  /ready               - Readiness check");
    if let Some(prefix) = admin_prefix {
        info!("  GET  {prefix}/status      - Module status (Admin)");
        info!("  POST {prefix}/reset       - Force module reload (Admin)");
    }

    server.run().await?;

    Ok(())
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,calc_bridge=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
