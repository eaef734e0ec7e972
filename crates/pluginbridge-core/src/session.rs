//! Reload sessions.
//!
//! A session exists from the moment a reload is requested until it reaches
//! `Applied` or `RolledBack`. Its phase only moves forward; the only
//! backwards-looking move is the jump to `RolledBack`.

use chrono::{DateTime, Utc};
use pluginbridge_runtime::CapabilitySet;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::BridgeError;

/// Opaque token tying a push to the acknowledgment it expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(Uuid);

impl CorrelationToken {
    /// Generate a fresh random token.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CorrelationToken {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Phase of a reload session, in sequence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadPhase {
    PermissionCheck,
    DependencyResolve,
    Pushing,
    AwaitingAck,
    Applied,
    RolledBack,
}

impl ReloadPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, ReloadPhase::Applied | ReloadPhase::RolledBack)
    }

    /// Whether a session in `self` may move to `next`.
    ///
    /// Non-terminal phases advance one step at a time and may always jump
    /// to `RolledBack`. `Applied` is only reachable from `AwaitingAck`.
    pub fn can_advance_to(self, next: ReloadPhase) -> bool {
        use ReloadPhase::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, RolledBack) => true,
            (PermissionCheck, DependencyResolve)
            | (DependencyResolve, Pushing)
            | (Pushing, AwaitingAck)
            | (AwaitingAck, Applied) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ReloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReloadPhase::PermissionCheck => "permission_check",
            ReloadPhase::DependencyResolve => "dependency_resolve",
            ReloadPhase::Pushing => "pushing",
            ReloadPhase::AwaitingAck => "awaiting_ack",
            ReloadPhase::Applied => "applied",
            ReloadPhase::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

/// Why an in-flight session is being cancelled.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CancelReason {
    /// Capabilities were denied while the session was in flight.
    Denied(CapabilitySet),
    /// The host cancelled the reload.
    Cancelled,
    /// The session sat in `PermissionCheck` past the approval timeout.
    Expired,
}

impl CancelReason {
    pub(crate) fn into_error(self, plugin_id: &str) -> BridgeError {
        match self {
            CancelReason::Denied(denied) => BridgeError::PermissionDenied {
                plugin_id: plugin_id.to_string(),
                denied,
            },
            CancelReason::Cancelled => BridgeError::Cancelled(plugin_id.to_string()),
            CancelReason::Expired => BridgeError::ApprovalExpired(plugin_id.to_string()),
        }
    }
}

/// An in-flight reload of one plugin to one target version.
#[derive(Debug)]
pub(crate) struct ReloadSession {
    pub plugin_id: String,
    pub target_version: Version,
    pub required: CapabilitySet,
    pub token: CorrelationToken,
    pub started_at: DateTime<Utc>,
    phase: ReloadPhase,
    /// A task is currently driving the session forward.
    pub driving: bool,
    /// Set while parked at a suspension point with no driver.
    pub suspended_since: Option<Instant>,
    cancel_tx: watch::Sender<Option<CancelReason>>,
}

impl ReloadSession {
    pub fn new(plugin_id: &str, target_version: Version, required: CapabilitySet) -> Self {
        let (cancel_tx, _) = watch::channel(None);
        Self {
            plugin_id: plugin_id.to_string(),
            target_version,
            required,
            token: CorrelationToken::new(),
            started_at: Utc::now(),
            phase: ReloadPhase::PermissionCheck,
            driving: true,
            suspended_since: None,
            cancel_tx,
        }
    }

    pub fn phase(&self) -> ReloadPhase {
        self.phase
    }

    /// Move to `next`. Returns `false` (and stays put) for an illegal move.
    pub fn advance(&mut self, next: ReloadPhase) -> bool {
        if self.phase.can_advance_to(next) {
            self.phase = next;
            true
        } else {
            tracing::error!(
                plugin = %self.plugin_id,
                from = %self.phase,
                to = %next,
                "refusing illegal reload phase transition"
            );
            false
        }
    }

    /// Park the session with no driver.
    pub fn suspend(&mut self) {
        self.suspend_at(Instant::now());
    }

    /// Park the session, counting its suspension from `since`.
    pub fn suspend_at(&mut self, since: Instant) {
        self.driving = false;
        self.suspended_since = Some(since);
    }

    /// Take ownership of a parked session.
    pub fn resume(&mut self) {
        self.driving = true;
        self.suspended_since = None;
    }

    pub fn subscribe_cancel(&self) -> watch::Receiver<Option<CancelReason>> {
        self.cancel_tx.subscribe()
    }

    /// Signal the driving task to stop at its next suspension point.
    pub fn cancel(&self, reason: CancelReason) {
        self.cancel_tx.send_replace(Some(reason));
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            plugin_id: self.plugin_id.clone(),
            target_version: self.target_version.clone(),
            token: self.token,
            phase: self.phase(),
            started_at: self.started_at,
            suspended: !self.driving,
        }
    }
}

/// Wait until a cancellation reason is published.
///
/// Never resolves if the session is dropped without one.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<Option<CancelReason>>) -> CancelReason {
    loop {
        if let Some(reason) = rx.borrow_and_update().clone() {
            return reason;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Cancellation already published, if any.
pub(crate) fn pending_cancel(rx: &watch::Receiver<Option<CancelReason>>) -> Option<CancelReason> {
    rx.borrow().clone()
}

/// Serializable snapshot of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub plugin_id: String,
    pub target_version: Version,
    pub token: CorrelationToken,
    pub phase: ReloadPhase,
    pub started_at: DateTime<Utc>,
    pub suspended: bool,
}
