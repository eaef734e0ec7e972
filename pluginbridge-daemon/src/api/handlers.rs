//! JSON-RPC API handlers for pluginbridge-daemon.
//!
//! Three kinds of clients talk to the daemon: the permission UI, the host
//! runtime (reloads and log events) and the remote surface, which polls
//! for pushes and answers with acknowledgments.

use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::ErrorObjectOwned;
use pluginbridge_core::{
    BridgeError, CorrelationToken, LogStats, PermissionSnapshot, PluginBridge, PluginRecord,
    PushMessage, SessionInfo,
};
use pluginbridge_runtime::{CapabilitySet, LogEvent, Version};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// A plugin record together with its in-flight reload, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDetails {
    pub record: PluginRecord,
    pub session: Option<SessionInfo>,
}

/// The JSON-RPC API interface of the plugin bridge.
#[rpc(server)]
pub trait PluginBridgeApi {
    /// List all registered plugins.
    #[method(name = "plugins.list")]
    async fn list_plugins(&self) -> RpcResult<Vec<PluginRecord>>;

    /// Get one plugin and its in-flight reload.
    #[method(name = "plugins.get")]
    async fn get_plugin(&self, plugin_id: String) -> RpcResult<PluginDetails>;

    #[method(name = "permissions.request")]
    async fn request_permissions(
        &self,
        plugin_id: String,
        capabilities: CapabilitySet,
    ) -> RpcResult<PermissionSnapshot>;

    #[method(name = "permissions.approve")]
    async fn approve_permissions(
        &self,
        plugin_id: String,
        capabilities: CapabilitySet,
    ) -> RpcResult<PermissionSnapshot>;

    #[method(name = "permissions.deny")]
    async fn deny_permissions(
        &self,
        plugin_id: String,
        capabilities: CapabilitySet,
    ) -> RpcResult<PermissionSnapshot>;

    /// Reload a plugin. Returns the new active version once the remote
    /// surface acknowledged it.
    #[method(name = "reload.start")]
    async fn start_reload(&self, plugin_id: String, version: Version) -> RpcResult<Version>;

    /// Cancel a plugin's in-flight reload. Returns whether there was one.
    #[method(name = "reload.cancel")]
    async fn cancel_reload(&self, plugin_id: String) -> RpcResult<bool>;

    #[method(name = "sessions.list")]
    async fn list_sessions(&self) -> RpcResult<Vec<SessionInfo>>;

    /// Take every push waiting for the remote surface. Pushes of reloads
    /// that already finished are discarded.
    #[method(name = "surface.poll")]
    async fn poll_surface(&self) -> RpcResult<Vec<PushMessage>>;

    /// Acknowledge a push. Returns `false` for unknown or stale tokens.
    #[method(name = "surface.ack")]
    async fn acknowledge(&self, token: CorrelationToken) -> RpcResult<bool>;

    #[method(name = "logs.emit")]
    async fn emit_log(&self, event: LogEvent) -> RpcResult<()>;

    #[method(name = "logs.stats")]
    async fn log_stats(&self) -> RpcResult<LogStats>;
}

/// Implementation of the plugin bridge API.
pub struct ApiImpl {
    bridge: Arc<PluginBridge>,
    outbox: Mutex<mpsc::Receiver<PushMessage>>,
}

impl ApiImpl {
    pub fn new(bridge: Arc<PluginBridge>, pushes: mpsc::Receiver<PushMessage>) -> Self {
        Self {
            bridge,
            outbox: Mutex::new(pushes),
        }
    }
}

/// Map a bridge error to a JSON-RPC error object carrying its stable code.
pub fn to_rpc_error(err: BridgeError) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(err.code(), err.to_string(), None::<()>)
}

#[jsonrpsee::core::async_trait]
impl PluginBridgeApiServer for ApiImpl {
    async fn list_plugins(&self) -> RpcResult<Vec<PluginRecord>> {
        Ok(self.bridge.plugins().await)
    }

    async fn get_plugin(&self, plugin_id: String) -> RpcResult<PluginDetails> {
        let record = self.bridge.record(&plugin_id).await.map_err(to_rpc_error)?;
        let session = self.bridge.session(&plugin_id).await.map_err(to_rpc_error)?;
        Ok(PluginDetails { record, session })
    }

    async fn request_permissions(
        &self,
        plugin_id: String,
        capabilities: CapabilitySet,
    ) -> RpcResult<PermissionSnapshot> {
        self.bridge
            .request_capabilities(&plugin_id, &capabilities)
            .await
            .map_err(to_rpc_error)
    }

    async fn approve_permissions(
        &self,
        plugin_id: String,
        capabilities: CapabilitySet,
    ) -> RpcResult<PermissionSnapshot> {
        self.bridge
            .approve(&plugin_id, &capabilities)
            .await
            .map_err(to_rpc_error)
    }

    async fn deny_permissions(
        &self,
        plugin_id: String,
        capabilities: CapabilitySet,
    ) -> RpcResult<PermissionSnapshot> {
        self.bridge
            .deny(&plugin_id, &capabilities)
            .await
            .map_err(to_rpc_error)
    }

    async fn start_reload(&self, plugin_id: String, version: Version) -> RpcResult<Version> {
        debug!(plugin = %plugin_id, %version, "reload.start");
        self.bridge
            .reload(&plugin_id, &version)
            .await
            .map_err(to_rpc_error)
    }

    async fn cancel_reload(&self, plugin_id: String) -> RpcResult<bool> {
        self.bridge
            .cancel_reload(&plugin_id)
            .await
            .map_err(to_rpc_error)
    }

    async fn list_sessions(&self) -> RpcResult<Vec<SessionInfo>> {
        Ok(self.bridge.sessions().await)
    }

    async fn poll_surface(&self) -> RpcResult<Vec<PushMessage>> {
        let mut outbox = self.outbox.lock().await;
        let mut pushes = Vec::new();
        while let Ok(push) = outbox.try_recv() {
            if self.bridge.awaiting_ack(push.token).await {
                pushes.push(push);
            } else {
                debug!(plugin = %push.plugin_id, token = %push.token, "Discarding push of finished reload");
            }
        }
        Ok(pushes)
    }

    async fn acknowledge(&self, token: CorrelationToken) -> RpcResult<bool> {
        Ok(self.bridge.acknowledge(token).await)
    }

    async fn emit_log(&self, event: LogEvent) -> RpcResult<()> {
        self.bridge.emit(event);
        Ok(())
    }

    async fn log_stats(&self) -> RpcResult<LogStats> {
        Ok(self.bridge.log_stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_preserved() {
        let err = to_rpc_error(BridgeError::PluginNotFound("ghost".into()));
        assert_eq!(err.code(), 1001);
        assert_eq!(err.message(), "Plugin not found: ghost");
    }
}
