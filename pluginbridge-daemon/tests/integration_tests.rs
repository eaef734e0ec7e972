//! Integration tests for pluginbridge-daemon.
//!
//! These tests build the daemon from a configuration, start the JSON-RPC
//! server on an ephemeral port and drive it with a real HTTP client, playing
//! the permission UI, the host runtime and the remote surface.

use anyhow::Result;
use jsonrpsee::core::client::{ClientT, Error as ClientError};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use pluginbridge_core::{LogStats, PermissionSnapshot, PluginRecord, PluginState, PushMessage};
use pluginbridge_daemon::api::handlers::{ApiImpl, PluginDetails};
use pluginbridge_daemon::api::start_server;
use pluginbridge_daemon::config::{Config, PluginConfig};
use pluginbridge_daemon::host;
use pluginbridge_runtime::{
    CapabilitySet, LogEvent, LogLevel, Module, ModuleRequirement, PluginManifest, Version,
    VersionReq,
};
use serde_json::json;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

// ============================================================================
// Test Utilities
// ============================================================================

/// `weather` installed at 1.0.0; 2.0.0 needs `network` and `renderer ^1`.
fn create_test_config() -> Config {
    let mut config = Config::default();
    config.daemon.bind_address = "127.0.0.1:0".to_string();
    config.bridge.reload.ack_timeout_ms = 2_000;
    config.catalog.manifests.push(
        PluginManifest::new("weather", Version::new(2, 0, 0))
            .with_capabilities(CapabilitySet::from_strings(["network"]))
            .with_requirement(ModuleRequirement::new(
                "renderer",
                VersionReq::parse("^1").unwrap(),
            )),
    );
    config
        .catalog
        .modules
        .push(Module::new("renderer", Version::new(1, 4, 0)));
    config.plugins.push(PluginConfig {
        id: "weather".to_string(),
        version: Version::new(1, 0, 0),
        granted: CapabilitySet::new(),
    });
    config
}

/// Starts a JSON-RPC server for testing and returns a client for it.
async fn start_test_server(config: &Config) -> Result<(HttpClient, jsonrpsee::server::ServerHandle)> {
    let host = host::build(config).await?;
    let api = ApiImpl::new(host.bridge, host.pushes);
    let (handle, addr) = start_server(&config.daemon.bind_address, api).await?;

    let client = HttpClientBuilder::default()
        .request_timeout(Duration::from_secs(10))
        .build(format!("http://{}", addr))?;
    Ok((client, handle))
}

/// Poll the surface until a push shows up, then acknowledge it.
async fn ack_next_push(client: &HttpClient) -> Result<PushMessage> {
    loop {
        let pushes: Vec<PushMessage> = client.request("surface.poll", rpc_params![]).await?;
        if let Some(push) = pushes.into_iter().next() {
            let acked: bool = client
                .request("surface.ack", rpc_params![push.token])
                .await?;
            assert!(acked);
            return Ok(push);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn error_code(err: &ClientError) -> Option<i32> {
    match err {
        ClientError::Call(obj) => Some(obj.code()),
        _ => None,
    }
}

// ============================================================================
// Config Tests
// ============================================================================

#[test]
fn test_config_file_lists_plugins() -> Result<()> {
    let mut file = NamedTempFile::new()?;
    file.write_all(
        br#"
[daemon]
bind_address = "127.0.0.1:0"

[[plugins]]
id = "clock"
version = "0.1.0"
"#,
    )?;

    let config = Config::load(file.path())?;
    assert_eq!(config.plugins.len(), 1);
    assert_eq!(config.plugins[0].version, Version::new(0, 1, 0));
    Ok(())
}

// ============================================================================
// JSON-RPC Tests
// ============================================================================

#[tokio::test]
async fn test_jsonrpc_plugins_list_and_get() -> Result<()> {
    let (client, handle) = start_test_server(&create_test_config()).await?;

    let plugins: Vec<PluginRecord> = client.request("plugins.list", rpc_params![]).await?;
    assert_eq!(plugins.len(), 1);
    assert_eq!(plugins[0].id, "weather");
    assert_eq!(plugins[0].state, PluginState::Idle);

    let details: PluginDetails = client.request("plugins.get", rpc_params!["weather"]).await?;
    assert_eq!(details.record.active_version, Version::new(1, 0, 0));
    assert!(details.session.is_none());

    let err = client
        .request::<PluginDetails, _>("plugins.get", rpc_params!["ghost"])
        .await
        .unwrap_err();
    assert_eq!(error_code(&err), Some(1001));

    handle.stop()?;
    Ok(())
}

#[tokio::test]
async fn test_jsonrpc_reload_lifecycle() -> Result<()> {
    let (client, handle) = start_test_server(&create_test_config()).await?;

    // Without approval the reload parks and reports PermissionPending.
    let err = client
        .request::<Version, _>("reload.start", rpc_params!["weather", "2.0.0"])
        .await
        .unwrap_err();
    assert_eq!(error_code(&err), Some(2001));

    let snapshot: PermissionSnapshot = client
        .request("permissions.approve", rpc_params!["weather", json!(["network"])])
        .await?;
    assert_eq!(snapshot.granted, CapabilitySet::from_strings(["network"]));

    // The approval resumes the reload in the background; play the surface.
    let push = ack_next_push(&client).await?;
    assert_eq!(push.version, Version::new(2, 0, 0));
    assert_eq!(push.graph.modules[0].module.version, Version::new(1, 4, 0));

    let mut applied = false;
    for _ in 0..50 {
        let details: PluginDetails = client.request("plugins.get", rpc_params!["weather"]).await?;
        if details.record.active_version == Version::new(2, 0, 0) {
            assert_eq!(details.record.state, PluginState::Applied);
            applied = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(applied);

    handle.stop()?;
    Ok(())
}

#[tokio::test]
async fn test_jsonrpc_reload_with_direct_ack() -> Result<()> {
    let mut config = create_test_config();
    config.plugins[0].granted = CapabilitySet::from_strings(["network"]);
    let (client, handle) = start_test_server(&config).await?;

    let surface = {
        let client = client.clone();
        tokio::spawn(async move { ack_next_push(&client).await })
    };

    let version: Version = client
        .request("reload.start", rpc_params!["weather", "2.0.0"])
        .await?;
    assert_eq!(version, Version::new(2, 0, 0));
    surface.await??;

    let sessions: Vec<serde_json::Value> = client.request("sessions.list", rpc_params![]).await?;
    assert!(sessions.is_empty());

    handle.stop()?;
    Ok(())
}

#[tokio::test]
async fn test_jsonrpc_reload_times_out_without_ack() -> Result<()> {
    let mut config = create_test_config();
    config.plugins[0].granted = CapabilitySet::from_strings(["network"]);
    config.bridge.reload.ack_timeout_ms = 100;
    let (client, handle) = start_test_server(&config).await?;

    let err = client
        .request::<Version, _>("reload.start", rpc_params!["weather", "2.0.0"])
        .await
        .unwrap_err();
    assert_eq!(error_code(&err), Some(4001));

    let details: PluginDetails = client.request("plugins.get", rpc_params!["weather"]).await?;
    assert_eq!(details.record.active_version, Version::new(1, 0, 0));
    assert_eq!(details.record.state, PluginState::RolledBack);

    // The push of the timed-out reload is never handed to the surface.
    let pushes: Vec<PushMessage> = client.request("surface.poll", rpc_params![]).await?;
    assert!(pushes.is_empty());

    handle.stop()?;
    Ok(())
}

#[tokio::test]
async fn test_jsonrpc_deny_rolls_back_suspended_reload() -> Result<()> {
    let (client, handle) = start_test_server(&create_test_config()).await?;

    let _ = client
        .request::<Version, _>("reload.start", rpc_params!["weather", "2.0.0"])
        .await;
    let snapshot: PermissionSnapshot = client
        .request("permissions.deny", rpc_params!["weather", json!(["network"])])
        .await?;
    assert_eq!(snapshot.denied, CapabilitySet::from_strings(["network"]));

    let details: PluginDetails = client.request("plugins.get", rpc_params!["weather"]).await?;
    assert!(details.session.is_none());
    assert_eq!(details.record.state, PluginState::RolledBack);

    let cancelled: bool = client.request("reload.cancel", rpc_params!["weather"]).await?;
    assert!(!cancelled);

    handle.stop()?;
    Ok(())
}

#[tokio::test]
async fn test_jsonrpc_logs() -> Result<()> {
    let (client, handle) = start_test_server(&create_test_config()).await?;

    let event = LogEvent::new(LogLevel::Error, "weather", "forecast fetch failed");
    let () = client.request("logs.emit", rpc_params![event]).await?;
    let event = LogEvent::new(LogLevel::Error, "weather", "retrying").retryable(true);
    let () = client.request("logs.emit", rpc_params![event]).await?;

    let stats: LogStats = client.request("logs.stats", rpc_params![]).await?;
    assert_eq!(stats.emitted, 2);
    assert_eq!(stats.notified, 1);

    handle.stop()?;
    Ok(())
}
