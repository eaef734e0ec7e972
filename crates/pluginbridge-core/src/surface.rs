//! The remote surface handshake.
//!
//! A push carries a [`CorrelationToken`]; the surface answers with an
//! [`Acknowledgment`] echoing it. The [`AckRouter`] matches the two up.
//! A waiter is always registered before the push goes out, so an
//! acknowledgment arriving immediately is never lost.

use async_trait::async_trait;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, trace};

use crate::resolver::ResolvedGraph;
use crate::session::CorrelationToken;

/// Update pushed to the remote surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub plugin_id: String,
    pub version: Version,
    pub graph: ResolvedGraph,
    pub token: CorrelationToken,
}

/// Acknowledgment sent back by the remote surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgment {
    pub token: CorrelationToken,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("remote surface unavailable: {0}")]
    Unavailable(String),
}

/// Whatever displays plugin UI on the other side of the bridge.
#[async_trait]
pub trait RemoteSurface: Send + Sync {
    /// Deliver an update. Returning `Ok` means the message was handed off,
    /// not that it was applied; application is signalled by an ack.
    async fn push(&self, message: PushMessage) -> Result<(), SurfaceError>;
}

/// Surface backed by an mpsc channel. The receiver half is handed to
/// whatever relays pushes to the real surface.
#[derive(Debug, Clone)]
pub struct ChannelSurface {
    tx: mpsc::Sender<PushMessage>,
}

impl ChannelSurface {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PushMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl RemoteSurface for ChannelSurface {
    async fn push(&self, message: PushMessage) -> Result<(), SurfaceError> {
        trace!(plugin = %message.plugin_id, token = %message.token, "Pushing to channel surface");
        self.tx
            .send(message)
            .await
            .map_err(|_| SurfaceError::Unavailable("receiver dropped".to_string()))
    }
}

/// Routes acknowledgments to the session waiting for them.
#[derive(Debug, Default)]
pub struct AckRouter {
    waiters: Mutex<HashMap<CorrelationToken, oneshot::Sender<Acknowledgment>>>,
}

impl AckRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `token`.
    pub async fn register(&self, token: CorrelationToken) -> oneshot::Receiver<Acknowledgment> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(token, tx);
        rx
    }

    /// Deliver an acknowledgment. Returns `false` for unknown or stale tokens.
    pub async fn acknowledge(&self, ack: Acknowledgment) -> bool {
        let waiter = self.waiters.lock().await.remove(&ack.token);
        match waiter {
            Some(tx) => tx.send(ack).is_ok(),
            None => {
                debug!(token = %ack.token, "Ignoring acknowledgment with unknown token");
                false
            }
        }
    }

    /// Drop the waiter for `token`, if still registered.
    pub async fn forget(&self, token: CorrelationToken) {
        self.waiters.lock().await.remove(&token);
    }

    /// Whether a waiter for `token` is still registered.
    pub async fn is_registered(&self, token: CorrelationToken) -> bool {
        self.waiters.lock().await.contains_key(&token)
    }

    pub async fn waiting(&self) -> usize {
        self.waiters.lock().await.len()
    }
}
