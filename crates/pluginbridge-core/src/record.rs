//! Per-plugin records held by the permission ledger.

use chrono::{DateTime, Utc};
use pluginbridge_runtime::CapabilitySet;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::session::ReloadPhase;

/// Lifecycle state of a plugin as seen by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "phase", rename_all = "snake_case")]
pub enum PluginState {
    /// No reload has happened yet.
    Idle,
    /// A reload session is in flight.
    Reloading(ReloadPhase),
    /// The last reload was applied.
    Applied,
    /// The last reload was rolled back.
    RolledBack,
}

/// Everything the bridge knows about one installed plugin.
///
/// `granted`, `pending` and `denied` never share a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRecord {
    /// Plugin identifier.
    pub id: String,

    /// Version currently running.
    pub active_version: Version,

    /// Version a rollback restores.
    pub last_known_good: Version,

    /// Target of the in-flight reload, if any.
    pub requested_version: Option<Version>,

    /// Capabilities explicitly approved.
    pub granted: CapabilitySet,

    /// Capabilities requested and awaiting a decision.
    pub pending: CapabilitySet,

    /// Capabilities explicitly denied.
    pub denied: CapabilitySet,

    /// Lifecycle state.
    pub state: PluginState,

    /// Last time the record changed.
    pub updated_at: DateTime<Utc>,
}

impl PluginRecord {
    pub fn new(id: impl Into<String>, version: Version) -> Self {
        Self {
            id: id.into(),
            active_version: version.clone(),
            last_known_good: version,
            requested_version: None,
            granted: CapabilitySet::new(),
            pending: CapabilitySet::new(),
            denied: CapabilitySet::new(),
            state: PluginState::Idle,
            updated_at: Utc::now(),
        }
    }

    /// Add capabilities to the pending set.
    ///
    /// Already granted capabilities are skipped; previously denied ones are
    /// asked for again. Returns `true` if anything changed.
    pub(crate) fn request(&mut self, caps: &CapabilitySet) -> bool {
        let mut changed = false;
        for cap in caps {
            if self.granted.has(cap) {
                continue;
            }
            self.denied.remove(cap);
            changed |= self.pending.add(cap.clone());
        }
        self.touch_if(changed)
    }

    /// Move pending capabilities to granted. Capabilities that were never
    /// requested are ignored.
    pub(crate) fn approve(&mut self, caps: &CapabilitySet) -> bool {
        let mut changed = false;
        for cap in caps {
            if self.pending.remove(cap) {
                self.granted.add(cap.clone());
                changed = true;
            }
        }
        self.touch_if(changed)
    }

    /// Record a denial, dropping the capability from pending and granted.
    pub(crate) fn deny(&mut self, caps: &CapabilitySet) -> bool {
        let mut changed = false;
        for cap in caps {
            let was_pending = self.pending.remove(cap);
            let was_granted = self.granted.remove(cap);
            let newly_denied = self.denied.add(cap.clone());
            changed |= was_pending || was_granted || newly_denied;
        }
        self.touch_if(changed)
    }

    pub(crate) fn set_state(&mut self, state: PluginState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    fn touch_if(&mut self, changed: bool) -> bool {
        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(names: &[&str]) -> CapabilitySet {
        CapabilitySet::from_strings(names)
    }

    #[test]
    fn test_request_is_idempotent() {
        let mut record = PluginRecord::new("p1", Version::new(1, 0, 0));
        assert!(record.request(&caps(&["network"])));
        let once = record.pending.clone();
        assert!(!record.request(&caps(&["network"])));
        assert_eq!(record.pending, once);
    }

    #[test]
    fn test_request_skips_granted_and_reopens_denied() {
        let mut record = PluginRecord::new("p1", Version::new(1, 0, 0));
        record.request(&caps(&["network", "clipboard"]));
        record.approve(&caps(&["network"]));
        record.deny(&caps(&["clipboard"]));

        record.request(&caps(&["network", "clipboard"]));
        assert_eq!(record.granted, caps(&["network"]));
        assert_eq!(record.pending, caps(&["clipboard"]));
        assert!(record.denied.is_empty());
    }

    #[test]
    fn test_approve_never_widens_unrequested() {
        let mut record = PluginRecord::new("p1", Version::new(1, 0, 0));
        assert!(!record.approve(&caps(&["process"])));
        assert!(record.granted.is_empty());
    }

    #[test]
    fn test_deny_revokes_grant() {
        let mut record = PluginRecord::new("p1", Version::new(1, 0, 0));
        record.request(&caps(&["network"]));
        record.approve(&caps(&["network"]));
        assert!(record.deny(&caps(&["network"])));
        assert!(record.granted.is_empty());
        assert_eq!(record.denied, caps(&["network"]));
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&PluginState::Reloading(ReloadPhase::AwaitingAck)).unwrap();
        assert_eq!(json, r#"{"state":"reloading","phase":"awaiting_ack"}"#);
        let idle = serde_json::to_string(&PluginState::Idle).unwrap();
        assert_eq!(idle, r#"{"state":"idle"}"#);
    }
}
