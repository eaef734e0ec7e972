//! Log collector bridge.
//!
//! Plugins emit [`LogEvent`]s; the bridge mirrors each one into `tracing`,
//! raises a user notification for severe non-retryable events, and
//! forwards everything to an external [`Collector`] from a background task.
//!
//! `emit` never waits: events go through a bounded queue, and an event that
//! does not fit is dropped and counted. Collector failures are retried with
//! backoff on the forwarding task and never reach the emitter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pluginbridge_runtime::{LogEvent, LogLevel};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::LogBridgeConfig;
use crate::retry::RetryPolicy;

// ============================================================================
// Seams
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectorError {
    #[error("collector unreachable: {0}")]
    Unreachable(String),

    #[error("collector rejected event: {0}")]
    Rejected(String),
}

/// External log sink.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn forward(&self, event: &LogEvent) -> Result<(), CollectorError>;
}

/// Shows notifications to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// A user-visible notification raised from a log event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub plugin_id: String,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&LogEvent> for Notification {
    fn from(event: &LogEvent) -> Self {
        Self {
            plugin_id: event.plugin_id.clone(),
            level: event.level,
            message: event.message.clone(),
            timestamp: event.timestamp,
        }
    }
}

/// Counters since the bridge started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStats {
    /// Events passed to `emit`.
    pub emitted: u64,
    /// Events the collector accepted.
    pub forwarded: u64,
    /// Notifications raised.
    pub notified: u64,
    /// Events lost to a full queue or an exhausted retry budget.
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    emitted: AtomicU64,
    forwarded: AtomicU64,
    notified: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> LogStats {
        LogStats {
            emitted: self.emitted.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            notified: self.notified.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

enum Command {
    Forward(LogEvent),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

// ============================================================================
// LogBridge
// ============================================================================

pub struct LogBridge {
    threshold: LogLevel,
    notifier: Arc<dyn Notifier>,
    queue: mpsc::Sender<Command>,
    counters: Arc<Counters>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl LogBridge {
    /// Start the bridge and its forwarding task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: &LogBridgeConfig,
        collector: Arc<dyn Collector>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (queue, rx) = mpsc::channel(config.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let forwarder = tokio::spawn(run_forwarder(
            rx,
            collector,
            config.forward.clone(),
            Arc::clone(&counters),
        ));

        Self {
            threshold: config.notify_threshold,
            notifier,
            queue,
            counters,
            forwarder: Mutex::new(Some(forwarder)),
        }
    }

    /// Accept a plugin log event. Never blocks and never fails.
    pub fn emit(&self, event: LogEvent) {
        self.counters.emitted.fetch_add(1, Ordering::Relaxed);
        mirror(&event);

        if event.level >= self.threshold && !event.retryable {
            self.notifier.notify(&Notification::from(&event));
            self.counters.notified.fetch_add(1, Ordering::Relaxed);
        }

        match self.queue.try_send(Command::Forward(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Log forwarding queue full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Log bridge shut down, dropping event");
            }
        }
    }

    /// Wait until every event emitted so far has been forwarded or dropped.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.queue.send(Command::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn stats(&self) -> LogStats {
        self.counters.snapshot()
    }

    /// Stop accepting events and wait for the queue to drain.
    pub async fn shutdown(&self) {
        let Some(handle) = self.forwarder.lock().await.take() else {
            return;
        };
        let _ = self.queue.send(Command::Shutdown).await;
        if let Err(e) = handle.await {
            error!("Log forwarder task failed: {}", e);
        }
        info!(stats = ?self.stats(), "Log bridge stopped");
    }
}

fn mirror(event: &LogEvent) {
    let plugin = event.plugin_id.as_str();
    let retryable = event.retryable;
    let message = event.message.as_str();
    match event.level {
        LogLevel::Trace => trace!(plugin, retryable, "{}", message),
        LogLevel::Debug => debug!(plugin, retryable, "{}", message),
        LogLevel::Info => info!(plugin, retryable, "{}", message),
        LogLevel::Warn => warn!(plugin, retryable, "{}", message),
        LogLevel::Error | LogLevel::Fatal => {
            error!(plugin, retryable, level = %event.level, "{}", message)
        }
    }
}

async fn run_forwarder(
    mut rx: mpsc::Receiver<Command>,
    collector: Arc<dyn Collector>,
    policy: RetryPolicy,
    counters: Arc<Counters>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Forward(event) => {
                forward_with_retry(collector.as_ref(), &policy, &counters, event).await
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
            Command::Shutdown => {
                debug!("Draining log forwarding queue");
                rx.close();
            }
        }
    }
}

async fn forward_with_retry(
    collector: &dyn Collector,
    policy: &RetryPolicy,
    counters: &Counters,
    event: LogEvent,
) {
    let mut attempt = 1;
    loop {
        let err = match collector.forward(&event).await {
            Ok(()) => {
                counters.forwarded.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(e) => e,
        };

        match policy.delay_after(attempt) {
            Some(delay) => {
                debug!(
                    plugin = %event.plugin_id,
                    attempt,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "Collector forward failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            None => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    plugin = %event.plugin_id,
                    attempts = attempt,
                    error = %err,
                    "Dropping log event after exhausting retries"
                );
                return;
            }
        }
    }
}
