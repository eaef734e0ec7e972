//! Events published by the bridge to its subscribers.

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::ledger::PermissionSnapshot;
use crate::logs::Notification;
use crate::session::{CorrelationToken, ReloadPhase};

/// How a reload session ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReloadOutcome {
    Applied {
        version: Version,
    },
    RolledBack {
        /// Version the plugin is running after the rollback.
        restored: Version,
        code: i32,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    PhaseChanged {
        plugin_id: String,
        token: CorrelationToken,
        phase: ReloadPhase,
    },
    /// The session parked and waits for something outside the bridge.
    ReloadSuspended {
        plugin_id: String,
        token: CorrelationToken,
        phase: ReloadPhase,
        reason: String,
    },
    ReloadFinished {
        plugin_id: String,
        token: CorrelationToken,
        outcome: ReloadOutcome,
    },
    PermissionsChanged {
        snapshot: PermissionSnapshot,
    },
    Notification(Notification),
}

impl BridgeEvent {
    /// Plugin the event concerns.
    pub fn plugin_id(&self) -> &str {
        match self {
            BridgeEvent::PhaseChanged { plugin_id, .. }
            | BridgeEvent::ReloadSuspended { plugin_id, .. }
            | BridgeEvent::ReloadFinished { plugin_id, .. } => plugin_id,
            BridgeEvent::PermissionsChanged { snapshot } => &snapshot.plugin_id,
            BridgeEvent::Notification(notification) => &notification.plugin_id,
        }
    }
}
