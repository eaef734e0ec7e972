//! The bridge facade.
//!
//! [`PluginBridge`] wires the ledger, resolver, coordinator and log bridge
//! together and is the single entry point for the host, the permission UI
//! and the remote surface.

use pluginbridge_runtime::{CapabilitySet, LogEvent};
use semver::Version;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::catalog::{ManifestSource, ModuleCatalog};
use crate::config::BridgeConfig;
use crate::coordinator::ReloadCoordinator;
use crate::error::BridgeResult;
use crate::events::BridgeEvent;
use crate::ledger::{PermissionLedger, PermissionSnapshot, PermissionStatus};
use crate::logs::{Collector, LogBridge, LogStats, Notification, Notifier};
use crate::record::PluginRecord;
use crate::resolver::{DependencyResolver, ResolvedGraph};
use crate::session::{CancelReason, CorrelationToken, SessionInfo};
use crate::surface::{Acknowledgment, RemoteSurface};

const EVENT_CAPACITY: usize = 256;

/// External collaborators the bridge talks to.
#[derive(Clone)]
pub struct BridgeServices {
    pub manifests: Arc<dyn ManifestSource>,
    pub modules: Arc<dyn ModuleCatalog>,
    pub surface: Arc<dyn RemoteSurface>,
    pub collector: Arc<dyn Collector>,
    pub notifier: Arc<dyn Notifier>,
}

/// Passes notifications on and mirrors them onto the event stream.
struct EventNotifier {
    inner: Arc<dyn Notifier>,
    events: broadcast::Sender<BridgeEvent>,
}

impl Notifier for EventNotifier {
    fn notify(&self, notification: &Notification) {
        self.inner.notify(notification);
        let _ = self
            .events
            .send(BridgeEvent::Notification(notification.clone()));
    }
}

pub struct PluginBridge {
    config: BridgeConfig,
    ledger: Arc<PermissionLedger>,
    resolver: Arc<DependencyResolver>,
    coordinator: Arc<ReloadCoordinator>,
    logs: LogBridge,
    events: broadcast::Sender<BridgeEvent>,
}

impl PluginBridge {
    /// Build a bridge. Must be called from within a tokio runtime.
    pub fn new(config: BridgeConfig, services: BridgeServices) -> BridgeResult<Self> {
        config.validate()?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let ledger = Arc::new(PermissionLedger::new());
        let resolver = Arc::new(DependencyResolver::new(
            Arc::clone(&services.manifests),
            services.modules,
            config.resolver.clone(),
        ));
        let coordinator = Arc::new(ReloadCoordinator::new(
            Arc::clone(&ledger),
            Arc::clone(&resolver),
            services.manifests,
            services.surface,
            config.reload.clone(),
            events.clone(),
        ));
        let notifier = Arc::new(EventNotifier {
            inner: services.notifier,
            events: events.clone(),
        });
        let logs = LogBridge::new(&config.logs, services.collector, notifier);

        info!(
            ack_timeout_ms = config.reload.ack_timeout_ms,
            resolver_attempts = config.resolver.max_attempts,
            notify_threshold = %config.logs.notify_threshold,
            "Plugin bridge started"
        );

        Ok(Self {
            config,
            ledger,
            resolver,
            coordinator,
            logs,
            events,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Subscribe to phase changes, outcomes, permission changes and notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------------
    // Plugins
    // ------------------------------------------------------------------------

    pub async fn register_plugin(&self, plugin_id: &str, version: Version) -> BridgeResult<PluginRecord> {
        self.ledger.register(plugin_id, version).await
    }

    pub async fn record(&self, plugin_id: &str) -> BridgeResult<PluginRecord> {
        self.ledger.record(plugin_id).await
    }

    pub async fn active_version(&self, plugin_id: &str) -> BridgeResult<Version> {
        self.ledger.active_version(plugin_id).await
    }

    /// Records of every registered plugin, ordered by id.
    pub async fn plugins(&self) -> Vec<PluginRecord> {
        let mut records = Vec::new();
        for plugin_id in self.ledger.plugin_ids().await {
            if let Ok(record) = self.ledger.record(&plugin_id).await {
                records.push(record);
            }
        }
        records
    }

    // ------------------------------------------------------------------------
    // Permissions
    // ------------------------------------------------------------------------

    pub async fn request_capabilities(
        &self,
        plugin_id: &str,
        caps: &CapabilitySet,
    ) -> BridgeResult<PermissionSnapshot> {
        let snapshot = self.ledger.request_capabilities(plugin_id, caps).await?;
        self.publish_permissions(&snapshot);
        Ok(snapshot)
    }

    /// Approve capabilities. A reload suspended on them continues in the
    /// background once nothing it requires is left pending.
    pub async fn approve(
        &self,
        plugin_id: &str,
        caps: &CapabilitySet,
    ) -> BridgeResult<PermissionSnapshot> {
        let snapshot = self.ledger.approve(plugin_id, caps).await?;
        self.publish_permissions(&snapshot);
        self.coordinator.resume_if_ready(plugin_id).await?;
        Ok(snapshot)
    }

    /// Deny capabilities and roll back any in-flight reload of the plugin.
    pub async fn deny(
        &self,
        plugin_id: &str,
        caps: &CapabilitySet,
    ) -> BridgeResult<PermissionSnapshot> {
        let snapshot = self.ledger.deny(plugin_id, caps).await?;
        self.publish_permissions(&snapshot);
        self.coordinator
            .cancel_session(plugin_id, CancelReason::Denied(caps.clone()))
            .await?;
        Ok(snapshot)
    }

    pub async fn permissions(&self, plugin_id: &str) -> BridgeResult<PermissionSnapshot> {
        self.ledger.snapshot(plugin_id).await
    }

    pub async fn permission_status(
        &self,
        plugin_id: &str,
        required: &CapabilitySet,
    ) -> BridgeResult<PermissionStatus> {
        self.ledger.permission_status(plugin_id, required).await
    }

    pub async fn is_fully_approved(
        &self,
        plugin_id: &str,
        required: &CapabilitySet,
    ) -> BridgeResult<bool> {
        self.ledger.is_fully_approved(plugin_id, required).await
    }

    // ------------------------------------------------------------------------
    // Reloads
    // ------------------------------------------------------------------------

    /// See [`ReloadCoordinator::reload`].
    pub async fn reload(&self, plugin_id: &str, version: &Version) -> BridgeResult<Version> {
        self.coordinator.reload(plugin_id, version).await
    }

    pub async fn cancel_reload(&self, plugin_id: &str) -> BridgeResult<bool> {
        self.coordinator.cancel(plugin_id).await
    }

    /// Deliver an acknowledgment from the remote surface. Returns `false`
    /// if no session is waiting for `token`.
    pub async fn acknowledge(&self, token: CorrelationToken) -> bool {
        self.coordinator.acknowledge(Acknowledgment { token }).await
    }

    /// Whether a live reload still waits for the acknowledgment of `token`.
    pub async fn awaiting_ack(&self, token: CorrelationToken) -> bool {
        self.coordinator.awaiting_ack(token).await
    }

    pub async fn session(&self, plugin_id: &str) -> BridgeResult<Option<SessionInfo>> {
        self.coordinator.session(plugin_id).await
    }

    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.coordinator.sessions().await
    }

    /// Resolve a version's dependencies without starting a reload.
    pub async fn resolve_dependencies(
        &self,
        plugin_id: &str,
        version: &Version,
    ) -> BridgeResult<ResolvedGraph> {
        self.resolver.resolve(plugin_id, version).await
    }

    pub async fn expire_stale_sessions(&self) -> usize {
        self.coordinator.expire_stale_sessions().await
    }

    // ------------------------------------------------------------------------
    // Logs
    // ------------------------------------------------------------------------

    pub fn emit(&self, event: LogEvent) {
        self.logs.emit(event);
    }

    pub async fn flush_logs(&self) {
        self.logs.flush().await;
    }

    pub fn log_stats(&self) -> LogStats {
        self.logs.stats()
    }

    /// Drain pending log events and stop the forwarder.
    pub async fn shutdown(&self) {
        self.logs.shutdown().await;
        info!("Plugin bridge stopped");
    }

    fn publish_permissions(&self, snapshot: &PermissionSnapshot) {
        let _ = self.events.send(BridgeEvent::PermissionsChanged {
            snapshot: snapshot.clone(),
        });
    }
}
