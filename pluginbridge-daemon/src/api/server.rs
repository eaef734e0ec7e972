//! JSON-RPC server implementation for pluginbridge-daemon.
//!
//! This module provides the server that listens on TCP localhost and handles
//! incoming JSON-RPC requests from clients.

use anyhow::{Context, Result};
use jsonrpsee::server::{Server, ServerHandle};
use std::net::SocketAddr;
use tracing::info;

use super::handlers::{ApiImpl, PluginBridgeApiServer};

/// Start the JSON-RPC API server.
///
/// # Returns
///
/// A tuple of (ServerHandle, SocketAddr) - the handle keeps the server running,
/// and the address shows where it's listening
pub async fn start_server(bind_address: &str, api: ApiImpl) -> Result<(ServerHandle, SocketAddr)> {
    info!("Starting JSON-RPC server on {}", bind_address);

    let server = Server::builder()
        .build(bind_address)
        .await
        .with_context(|| format!("Failed to build JSON-RPC server on {bind_address}"))?;

    let addr = server
        .local_addr()
        .context("Failed to get server address")?;

    let handle = server.start(api.into_rpc());
    info!("JSON-RPC server listening on {}", addr);

    Ok((handle, addr))
}
