//! Permission ledger.
//!
//! Owns every [`PluginRecord`]. Records live in per-plugin slots, each
//! behind its own async mutex, so calls for one plugin are serialized
//! while calls for different plugins never contend beyond the short map
//! lookup. The reload session of a plugin shares that slot, which keeps
//! permission changes and session transitions under one writer.

use pluginbridge_runtime::CapabilitySet;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{BridgeError, BridgeResult};
use crate::record::PluginRecord;
use crate::session::ReloadSession;

/// A plugin record together with its in-flight session.
#[derive(Debug)]
pub(crate) struct PluginSlot {
    pub record: PluginRecord,
    pub session: Option<ReloadSession>,
}

/// Granted / pending / denied sets after a ledger operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionSnapshot {
    pub plugin_id: String,
    pub granted: CapabilitySet,
    pub pending: CapabilitySet,
    pub denied: CapabilitySet,
}

impl PermissionSnapshot {
    pub(crate) fn of(record: &PluginRecord) -> Self {
        Self {
            plugin_id: record.id.clone(),
            granted: record.granted.clone(),
            pending: record.pending.clone(),
            denied: record.denied.clone(),
        }
    }
}

/// Where a set of required capabilities stands.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionStatus {
    /// Everything required is granted.
    Approved,
    /// Some required capabilities were denied. Takes precedence.
    Denied(CapabilitySet),
    /// Some required capabilities await a decision.
    Pending(CapabilitySet),
    /// Some required capabilities were never requested.
    Unrequested(CapabilitySet),
}

impl PermissionStatus {
    /// Classify `required` against a record.
    pub fn of(record: &PluginRecord, required: &CapabilitySet) -> Self {
        let denied = required.intersection(&record.denied);
        if !denied.is_empty() {
            return PermissionStatus::Denied(denied);
        }
        let pending = required.intersection(&record.pending);
        if !pending.is_empty() {
            return PermissionStatus::Pending(pending);
        }
        let missing = required.difference(&record.granted);
        if !missing.is_empty() {
            return PermissionStatus::Unrequested(missing);
        }
        PermissionStatus::Approved
    }
}

/// Tracks capability approval state for every registered plugin.
#[derive(Debug, Default)]
pub struct PermissionLedger {
    slots: RwLock<HashMap<String, Arc<Mutex<PluginSlot>>>>,
}

impl PermissionLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an installed plugin at its current version.
    pub async fn register(&self, plugin_id: &str, version: Version) -> BridgeResult<PluginRecord> {
        let mut slots = self.slots.write().await;
        if slots.contains_key(plugin_id) {
            return Err(BridgeError::AlreadyRegistered(plugin_id.to_string()));
        }

        let record = PluginRecord::new(plugin_id, version);
        info!(plugin = %plugin_id, version = %record.active_version, "Registered plugin");
        slots.insert(
            plugin_id.to_string(),
            Arc::new(Mutex::new(PluginSlot {
                record: record.clone(),
                session: None,
            })),
        );
        Ok(record)
    }

    /// Add capabilities to the plugin's pending set. Idempotent.
    pub async fn request_capabilities(
        &self,
        plugin_id: &str,
        caps: &CapabilitySet,
    ) -> BridgeResult<PermissionSnapshot> {
        let slot = self.slot(plugin_id).await?;
        let mut guard = slot.lock().await;
        if guard.record.request(caps) {
            debug!(plugin = %plugin_id, pending = %guard.record.pending, "Capabilities requested");
        }
        Ok(PermissionSnapshot::of(&guard.record))
    }

    /// Move capabilities from pending to granted.
    pub async fn approve(
        &self,
        plugin_id: &str,
        caps: &CapabilitySet,
    ) -> BridgeResult<PermissionSnapshot> {
        let slot = self.slot(plugin_id).await?;
        let mut guard = slot.lock().await;
        if guard.record.approve(caps) {
            info!(plugin = %plugin_id, granted = %guard.record.granted, "Capabilities approved");
        }
        Ok(PermissionSnapshot::of(&guard.record))
    }

    /// Remove capabilities from pending (and granted) without granting them.
    pub async fn deny(
        &self,
        plugin_id: &str,
        caps: &CapabilitySet,
    ) -> BridgeResult<PermissionSnapshot> {
        let slot = self.slot(plugin_id).await?;
        let mut guard = slot.lock().await;
        if guard.record.deny(caps) {
            info!(plugin = %plugin_id, denied = %guard.record.denied, "Capabilities denied");
        }
        Ok(PermissionSnapshot::of(&guard.record))
    }

    /// True only if every required capability is granted and none is pending.
    pub async fn is_fully_approved(
        &self,
        plugin_id: &str,
        required: &CapabilitySet,
    ) -> BridgeResult<bool> {
        Ok(self.permission_status(plugin_id, required).await? == PermissionStatus::Approved)
    }

    /// Classify a required set against the plugin's current approvals.
    pub async fn permission_status(
        &self,
        plugin_id: &str,
        required: &CapabilitySet,
    ) -> BridgeResult<PermissionStatus> {
        let slot = self.slot(plugin_id).await?;
        let guard = slot.lock().await;
        Ok(PermissionStatus::of(&guard.record, required))
    }

    /// Current permission sets of a plugin.
    pub async fn snapshot(&self, plugin_id: &str) -> BridgeResult<PermissionSnapshot> {
        let slot = self.slot(plugin_id).await?;
        let guard = slot.lock().await;
        Ok(PermissionSnapshot::of(&guard.record))
    }

    /// Clone of a plugin's record.
    pub async fn record(&self, plugin_id: &str) -> BridgeResult<PluginRecord> {
        let slot = self.slot(plugin_id).await?;
        let guard = slot.lock().await;
        Ok(guard.record.clone())
    }

    /// Version the plugin is currently running.
    pub async fn active_version(&self, plugin_id: &str) -> BridgeResult<Version> {
        Ok(self.record(plugin_id).await?.active_version)
    }

    /// Ids of every registered plugin, sorted.
    pub async fn plugin_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.slots.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Get the number of registered plugins.
    pub async fn plugin_count(&self) -> usize {
        self.slots.read().await.len()
    }

    pub(crate) async fn slot(&self, plugin_id: &str) -> BridgeResult<Arc<Mutex<PluginSlot>>> {
        self.slots
            .read()
            .await
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| BridgeError::PluginNotFound(plugin_id.to_string()))
    }
}
