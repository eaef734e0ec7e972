//! Reload coordinator.
//!
//! Drives a plugin from its active version to a requested target version
//! through the phases of [`ReloadPhase`]. It is the only writer of a
//! plugin's active version, and writes it exactly once per session, at the
//! terminal transition, under the plugin's lock.
//!
//! # Suspension points
//!
//! - **PermissionCheck**: the session is parked in the plugin slot with no
//!   driving task until an approval (or another `reload` call) resumes it.
//! - **DependencyResolve**: the driving task sleeps between attempts.
//! - **Pushing** and **AwaitingAck**: one acknowledgment deadline starts
//!   before the push. The push and then the acknowledgment wait each race
//!   that deadline and a cancellation.
//!
//! None of them hold the plugin lock while waiting. Every driven session
//! runs on its own task, so a caller that stops waiting on [`reload`]
//! does not strand the session short of `Applied` or `RolledBack`.
//!
//! [`reload`]: ReloadCoordinator::reload

use semver::Version;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::catalog::ManifestSource;
use crate::config::ReloadConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::events::{BridgeEvent, ReloadOutcome};
use crate::ledger::{PermissionLedger, PermissionSnapshot, PermissionStatus, PluginSlot};
use crate::record::PluginState;
use crate::resolver::{exhausted_error, DependencyResolver, ResolveError};
use crate::session::{
    cancelled, pending_cancel, CancelReason, CorrelationToken, ReloadPhase, ReloadSession,
    SessionInfo,
};
use crate::surface::{Acknowledgment, AckRouter, PushMessage, RemoteSurface};

// ============================================================================
// ReloadCoordinator
// ============================================================================

/// Runs reload sessions, one per plugin at a time.
pub struct ReloadCoordinator {
    ledger: Arc<PermissionLedger>,
    resolver: Arc<DependencyResolver>,
    manifests: Arc<dyn ManifestSource>,
    surface: Arc<dyn RemoteSurface>,
    acks: AckRouter,
    config: ReloadConfig,
    events: broadcast::Sender<BridgeEvent>,
}

impl ReloadCoordinator {
    pub fn new(
        ledger: Arc<PermissionLedger>,
        resolver: Arc<DependencyResolver>,
        manifests: Arc<dyn ManifestSource>,
        surface: Arc<dyn RemoteSurface>,
        config: ReloadConfig,
        events: broadcast::Sender<BridgeEvent>,
    ) -> Self {
        Self {
            ledger,
            resolver,
            manifests,
            surface,
            acks: AckRouter::new(),
            config,
            events,
        }
    }

    /// Reload `plugin_id` to `target`.
    ///
    /// Returns the new active version once the remote surface acknowledged
    /// it. On any terminal failure the plugin is left at its previous
    /// version. `PermissionPending` leaves the session suspended: approving
    /// the pending capabilities or calling `reload` again with the same
    /// target continues it.
    ///
    /// Dropping the returned future stops waiting for the outcome, not the
    /// session.
    pub async fn reload(self: &Arc<Self>, plugin_id: &str, target: &Version) -> BridgeResult<Version> {
        match self.spawn_drive(plugin_id, target).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(BridgeError::Cancelled(plugin_id.to_string())),
        }
    }

    fn spawn_drive(
        self: &Arc<Self>,
        plugin_id: &str,
        target: &Version,
    ) -> JoinHandle<BridgeResult<Version>> {
        let this = Arc::clone(self);
        let plugin_id = plugin_id.to_string();
        let target = target.clone();
        tokio::spawn(async move { this.drive(&plugin_id, &target).await })
    }

    async fn drive(&self, plugin_id: &str, target: &Version) -> BridgeResult<Version> {
        let slot = self.ledger.slot(plugin_id).await?;
        let manifest = self
            .manifests
            .manifest(plugin_id, target)
            .await
            .ok_or_else(|| BridgeError::UnknownVersion {
                plugin_id: plugin_id.to_string(),
                version: target.clone(),
            })?;

        // PermissionCheck
        let (token, mut cancel_rx) = {
            let mut guard = slot.lock().await;
            let slot = &mut *guard;

            let (token, required, cancel_rx, parked_at) = match slot.session.as_mut() {
                Some(session) if session.driving || session.target_version != *target => {
                    return Err(BridgeError::ReloadInProgress {
                        plugin_id: plugin_id.to_string(),
                        target: session.target_version.clone(),
                    });
                }
                Some(session) => {
                    let parked_at = session.suspended_since;
                    session.resume();
                    info!(plugin = %plugin_id, version = %target, token = %session.token, "Resuming reload");
                    (
                        session.token,
                        session.required.clone(),
                        session.subscribe_cancel(),
                        parked_at,
                    )
                }
                None => {
                    if slot.record.active_version == *target {
                        return Err(BridgeError::AlreadyActive {
                            plugin_id: plugin_id.to_string(),
                            version: target.clone(),
                        });
                    }
                    let session =
                        ReloadSession::new(plugin_id, target.clone(), manifest.capabilities.clone());
                    info!(
                        plugin = %plugin_id,
                        from = %slot.record.active_version,
                        to = %target,
                        token = %session.token,
                        "Starting reload"
                    );
                    slot.record.requested_version = Some(target.clone());
                    slot.record
                        .set_state(PluginState::Reloading(ReloadPhase::PermissionCheck));
                    self.publish(BridgeEvent::PhaseChanged {
                        plugin_id: plugin_id.to_string(),
                        token: session.token,
                        phase: ReloadPhase::PermissionCheck,
                    });
                    let entry = (
                        session.token,
                        session.required.clone(),
                        session.subscribe_cancel(),
                        None,
                    );
                    slot.session = Some(session);
                    entry
                }
            };

            let mut status = PermissionStatus::of(&slot.record, &required);
            if let PermissionStatus::Unrequested(missing) = &status {
                slot.record.request(missing);
                debug!(plugin = %plugin_id, requested = %missing, "Requested missing capabilities");
                self.publish(BridgeEvent::PermissionsChanged {
                    snapshot: PermissionSnapshot::of(&slot.record),
                });
                status = PermissionStatus::of(&slot.record, &required);
            }

            match status {
                PermissionStatus::Approved => {}
                PermissionStatus::Denied(denied) => {
                    let error = BridgeError::PermissionDenied {
                        plugin_id: plugin_id.to_string(),
                        denied,
                    };
                    return Err(self.rollback(slot, token, error).await);
                }
                PermissionStatus::Pending(pending) | PermissionStatus::Unrequested(pending) => {
                    // A retried reload keeps the approval clock running.
                    if let Some(session) = slot.session.as_mut() {
                        session.suspend_at(parked_at.unwrap_or_else(Instant::now));
                    }
                    info!(plugin = %plugin_id, pending = %pending, "Reload suspended awaiting approval");
                    self.publish(BridgeEvent::ReloadSuspended {
                        plugin_id: plugin_id.to_string(),
                        token,
                        phase: ReloadPhase::PermissionCheck,
                        reason: format!("awaiting approval of {pending}"),
                    });
                    return Err(BridgeError::PermissionPending {
                        plugin_id: plugin_id.to_string(),
                        pending,
                    });
                }
            }

            self.set_phase(slot, token, ReloadPhase::DependencyResolve);
            (token, cancel_rx)
        };

        // DependencyResolve
        let graph = match self
            .resolver
            .resolve_until(plugin_id, target, &mut cancel_rx)
            .await
        {
            Ok(graph) => graph,
            Err(err) => {
                let error = match err {
                    ResolveError::Exhausted { reason, attempts } => {
                        exhausted_error(plugin_id, target, reason, attempts)
                    }
                    ResolveError::Cancelled(reason) => reason.into_error(plugin_id),
                };
                let mut guard = slot.lock().await;
                return Err(self.rollback(&mut guard, token, error).await);
            }
        };

        // Pushing
        let deadline = Instant::now() + self.config.ack_timeout();
        let ack_rx = {
            let mut guard = slot.lock().await;
            if let Some(reason) = pending_cancel(&cancel_rx) {
                return Err(self
                    .rollback(&mut guard, token, reason.into_error(plugin_id))
                    .await);
            }
            self.set_phase(&mut guard, token, ReloadPhase::Pushing);
            self.acks.register(token).await
        };

        let message = PushMessage {
            plugin_id: plugin_id.to_string(),
            version: target.clone(),
            graph,
            token,
        };
        let pushed = tokio::select! {
            biased;
            reason = cancelled(&mut cancel_rx) => Err(reason.into_error(plugin_id)),
            result = self.surface.push(message) => result.map_err(|e| BridgeError::PushFailed {
                plugin_id: plugin_id.to_string(),
                reason: e.to_string(),
            }),
            _ = tokio::time::sleep_until(deadline) => Err(self.timeout_error(plugin_id, target)),
        };

        {
            let mut guard = slot.lock().await;
            let pushed = pushed.and_then(|()| match pending_cancel(&cancel_rx) {
                Some(reason) => Err(reason.into_error(plugin_id)),
                None => Ok(()),
            });
            if let Err(error) = pushed {
                return Err(self.rollback(&mut guard, token, error).await);
            }
            self.set_phase(&mut guard, token, ReloadPhase::AwaitingAck);
        }

        // AwaitingAck
        let outcome = tokio::select! {
            biased;
            ack = ack_rx => match ack {
                Ok(_) => Ok(()),
                Err(_) => Err(BridgeError::PushFailed {
                    plugin_id: plugin_id.to_string(),
                    reason: "acknowledgment channel closed".to_string(),
                }),
            },
            reason = cancelled(&mut cancel_rx) => Err(reason.into_error(plugin_id)),
            _ = tokio::time::sleep_until(deadline) => Err(self.timeout_error(plugin_id, target)),
        };

        let mut guard = slot.lock().await;
        match outcome {
            Ok(()) => Ok(self.finish_applied(&mut guard, token)),
            Err(error) => Err(self.rollback(&mut guard, token, error).await),
        }
    }

    /// Deliver an acknowledgment from the remote surface.
    pub async fn acknowledge(&self, ack: Acknowledgment) -> bool {
        self.acks.acknowledge(ack).await
    }

    /// Cancel the in-flight session of a plugin, if any.
    ///
    /// Returns whether there was a session to cancel.
    pub async fn cancel(&self, plugin_id: &str) -> BridgeResult<bool> {
        self.cancel_session(plugin_id, CancelReason::Cancelled).await
    }

    pub(crate) async fn cancel_session(
        &self,
        plugin_id: &str,
        reason: CancelReason,
    ) -> BridgeResult<bool> {
        let slot = self.ledger.slot(plugin_id).await?;
        let mut guard = slot.lock().await;
        let Some(session) = guard.session.as_ref() else {
            return Ok(false);
        };

        if session.driving {
            debug!(plugin = %plugin_id, token = %session.token, "Signalling cancellation");
            session.cancel(reason);
        } else {
            let token = session.token;
            let error = reason.into_error(plugin_id);
            self.rollback(&mut guard, token, error).await;
        }
        Ok(true)
    }

    /// Continue a suspended session on a background task once its required
    /// capabilities are all granted.
    ///
    /// Returns whether a resumption was started. The outcome is published
    /// as [`BridgeEvent::ReloadFinished`].
    pub async fn resume_if_ready(self: &Arc<Self>, plugin_id: &str) -> BridgeResult<bool> {
        let slot = self.ledger.slot(plugin_id).await?;
        let target = {
            let guard = slot.lock().await;
            match guard.session.as_ref() {
                Some(session)
                    if !session.driving
                        && PermissionStatus::of(&guard.record, &session.required)
                            == PermissionStatus::Approved =>
                {
                    session.target_version.clone()
                }
                _ => return Ok(false),
            }
        };

        let this = Arc::clone(self);
        let plugin_id = plugin_id.to_string();
        tokio::spawn(async move {
            match this.drive(&plugin_id, &target).await {
                Ok(version) => debug!(plugin = %plugin_id, %version, "Resumed reload applied"),
                Err(e) => debug!(plugin = %plugin_id, error = %e, "Resumed reload did not apply"),
            }
        });
        Ok(true)
    }

    /// Roll back sessions that waited for approval longer than the
    /// configured approval timeout. Returns how many were rolled back.
    pub async fn expire_stale_sessions(&self) -> usize {
        let limit = self.config.approval_timeout();
        let mut expired = 0;

        for plugin_id in self.ledger.plugin_ids().await {
            let Ok(slot) = self.ledger.slot(&plugin_id).await else {
                continue;
            };
            let mut guard = slot.lock().await;
            let stale = guard.session.as_ref().and_then(|session| {
                let since = session.suspended_since?;
                (since.elapsed() >= limit).then_some(session.token)
            });
            if let Some(token) = stale {
                let error = CancelReason::Expired.into_error(&plugin_id);
                self.rollback(&mut guard, token, error).await;
                expired += 1;
            }
        }

        if expired > 0 {
            info!(count = expired, "Expired stale reload sessions");
        }
        expired
    }

    /// Whether a live session is still waiting for an acknowledgment of
    /// `token`. Pushes of finished sessions answer `false`.
    pub async fn awaiting_ack(&self, token: CorrelationToken) -> bool {
        self.acks.is_registered(token).await
    }

    /// Snapshot of a plugin's in-flight session.
    pub async fn session(&self, plugin_id: &str) -> BridgeResult<Option<SessionInfo>> {
        let slot = self.ledger.slot(plugin_id).await?;
        let guard = slot.lock().await;
        Ok(guard.session.as_ref().map(ReloadSession::info))
    }

    /// Snapshots of every in-flight session.
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        let mut sessions = Vec::new();
        for plugin_id in self.ledger.plugin_ids().await {
            if let Ok(Some(info)) = self.session(&plugin_id).await {
                sessions.push(info);
            }
        }
        sessions
    }

    // ========================================================================
    // Transitions (caller holds the plugin lock)
    // ========================================================================

    fn set_phase(&self, slot: &mut PluginSlot, token: CorrelationToken, phase: ReloadPhase) {
        let Some(session) = slot.session.as_mut().filter(|s| s.token == token) else {
            return;
        };
        if session.advance(phase) {
            slot.record.set_state(PluginState::Reloading(phase));
            debug!(plugin = %slot.record.id, %phase, "Reload phase changed");
            self.publish(BridgeEvent::PhaseChanged {
                plugin_id: slot.record.id.clone(),
                token,
                phase,
            });
        }
    }

    fn finish_applied(&self, slot: &mut PluginSlot, token: CorrelationToken) -> Version {
        let Some(mut session) = take_session(slot, token) else {
            return slot.record.active_version.clone();
        };
        session.advance(ReloadPhase::Applied);

        let record = &mut slot.record;
        let previous = std::mem::replace(&mut record.active_version, session.target_version.clone());
        record.last_known_good = session.target_version.clone();
        record.requested_version = None;
        record.set_state(PluginState::Applied);

        info!(
            plugin = %record.id,
            from = %previous,
            to = %record.active_version,
            token = %token,
            "Reload applied"
        );
        self.publish(BridgeEvent::PhaseChanged {
            plugin_id: record.id.clone(),
            token,
            phase: ReloadPhase::Applied,
        });
        self.publish(BridgeEvent::ReloadFinished {
            plugin_id: record.id.clone(),
            token,
            outcome: ReloadOutcome::Applied {
                version: record.active_version.clone(),
            },
        });
        record.active_version.clone()
    }

    async fn rollback(
        &self,
        slot: &mut PluginSlot,
        token: CorrelationToken,
        error: BridgeError,
    ) -> BridgeError {
        let Some(mut session) = take_session(slot, token) else {
            return error;
        };
        session.advance(ReloadPhase::RolledBack);
        self.acks.forget(token).await;

        let record = &mut slot.record;
        record.active_version = record.last_known_good.clone();
        record.requested_version = None;
        record.set_state(PluginState::RolledBack);

        warn!(
            plugin = %record.id,
            target = %session.target_version,
            restored = %record.active_version,
            token = %token,
            error = %error,
            "Reload rolled back"
        );
        self.publish(BridgeEvent::PhaseChanged {
            plugin_id: record.id.clone(),
            token,
            phase: ReloadPhase::RolledBack,
        });
        self.publish(BridgeEvent::ReloadFinished {
            plugin_id: record.id.clone(),
            token,
            outcome: ReloadOutcome::RolledBack {
                restored: record.active_version.clone(),
                code: error.code(),
                error: error.to_string(),
            },
        });
        error
    }

    fn timeout_error(&self, plugin_id: &str, target: &Version) -> BridgeError {
        BridgeError::ReloadTimeout {
            plugin_id: plugin_id.to_string(),
            version: target.clone(),
            timeout_ms: self.config.ack_timeout_ms,
        }
    }

    fn publish(&self, event: BridgeEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Detach the session identified by `token`. A session started later under
/// a different token is left alone.
fn take_session(slot: &mut PluginSlot, token: CorrelationToken) -> Option<ReloadSession> {
    if slot.session.as_ref().map(|s| s.token) == Some(token) {
        slot.session.take()
    } else {
        None
    }
}
