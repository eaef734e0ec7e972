//! # pluginbridge-daemon
//!
//! Hosts the plugin bridge and exposes it over JSON-RPC.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   pluginbridge-daemon                     │
//! │                                                           │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐          │
//! │  │ Permission │  │   Reload   │  │    Log     │          │
//! │  │   Ledger   │  │ Coordinator│  │   Bridge   │──────────┼──▶ Collector
//! │  └────────────┘  └────────────┘  └────────────┘          │
//! │                                                           │
//! │  ┌─────────────────────────────────────────────────────┐ │
//! │  │               JSON-RPC API Server (TCP)              │ │
//! │  └─────────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────┘
//!                              │
//!           ┌──────────────────┼──────────────────┐
//!           ▼                  ▼                  ▼
//!     ┌────────────┐    ┌────────────┐     ┌────────────┐
//!     │ Permission │    │    Host    │     │   Remote   │
//!     │     UI     │    │  Runtime   │     │  Surface   │
//!     └────────────┘    └────────────┘     └────────────┘
//! ```
//!
//! ## Configuration
//!
//! The daemon reads configuration from `$XDG_CONFIG_HOME/pluginbridge/config.toml`.
//!
//! ## Running
//!
//! ```bash
//! # Start the daemon
//! cargo run --bin pluginbridge-daemon
//!
//! # With debug logging
//! RUST_LOG=debug cargo run --bin pluginbridge-daemon
//! ```

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pluginbridge_daemon::api::{self, handlers::ApiImpl};
use pluginbridge_daemon::config::Config;
use pluginbridge_daemon::host;

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration decides the default log level, so load it first.
    let loaded = Config::load_default();
    let log_level = loaded
        .as_ref()
        .map(|cfg| cfg.daemon.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .with_target(true)
        .init();

    info!("Starting pluginbridge-daemon v{}", env!("CARGO_PKG_VERSION"));

    let config = match loaded {
        Ok(cfg) => {
            info!("Loaded configuration from default path");
            cfg
        }
        Err(e) => {
            warn!("Failed to load config, using defaults: {:#}", e);
            Config::default()
        }
    };

    let host = host::build(&config).await?;
    let bridge = host.bridge.clone();
    info!("Registered {} plugin(s)", bridge.plugins().await.len());

    let sweeper =
        host::spawn_session_sweeper(bridge.clone(), config.daemon.session_sweep_interval());

    let api = ApiImpl::new(host.bridge, host.pushes);
    let (server_handle, addr) = api::start_server(&config.daemon.bind_address, api).await?;

    info!("Daemon startup complete");
    info!("Listening on: {}", addr);
    info!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");

    server_handle.stop()?;
    server_handle.stopped().await;
    sweeper.abort();
    bridge.shutdown().await;

    info!("Daemon stopped");
    Ok(())
}
