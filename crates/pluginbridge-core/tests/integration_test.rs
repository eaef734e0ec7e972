//! End-to-end tests for the plugin bridge facade.
//!
//! Every test drives a real `PluginBridge` wired to in-memory manifests and
//! modules, a channel-backed remote surface and a recording collector.

use async_trait::async_trait;
use pluginbridge_core::{
    BridgeConfig, BridgeError, BridgeEvent, BridgeServices, ChannelSurface, Collector,
    CollectorError, InMemoryModules, ManifestCatalog, Notification, Notifier, PluginBridge,
    PluginState, PushMessage, ReloadOutcome, ResolutionFailure,
};
use pluginbridge_runtime::{
    CapabilitySet, LogEvent, LogLevel, Module, ModuleRequirement, PluginManifest, Version,
    VersionReq,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// ============================================================================
// Test Utilities
// ============================================================================

#[derive(Default)]
struct RecordingCollector {
    events: Mutex<Vec<LogEvent>>,
}

#[async_trait]
impl Collector for RecordingCollector {
    async fn forward(&self, event: &LogEvent) -> Result<(), CollectorError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) {
        self.seen.lock().unwrap().push(notification.clone());
    }
}

struct Harness {
    bridge: Arc<PluginBridge>,
    modules: Arc<InMemoryModules>,
    pushes: mpsc::Receiver<PushMessage>,
    collector: Arc<RecordingCollector>,
    notifier: Arc<RecordingNotifier>,
}

fn caps(names: &[&str]) -> CapabilitySet {
    CapabilitySet::from_strings(names)
}

fn v(major: u64) -> Version {
    Version::new(major, 0, 0)
}

/// Plugin `p1` installed at 1.0.0; 2.0.0 needs `required` and `renderer ^1`.
async fn harness(required: &[&str], modules: Vec<Module>) -> Harness {
    let manifests = Arc::new(ManifestCatalog::new());
    manifests.insert(PluginManifest::new("p1", v(1))).await;
    manifests
        .insert(
            PluginManifest::new("p1", v(2))
                .with_capabilities(caps(required))
                .with_requirement(ModuleRequirement::new(
                    "renderer",
                    VersionReq::parse("^1").unwrap(),
                )),
        )
        .await;

    let modules = Arc::new(InMemoryModules::with_modules(modules));
    let (surface, pushes) = ChannelSurface::new(8);
    let collector = Arc::new(RecordingCollector::default());
    let notifier = Arc::new(RecordingNotifier::default());

    let bridge = PluginBridge::new(
        BridgeConfig::default(),
        BridgeServices {
            manifests,
            modules: modules.clone(),
            surface: Arc::new(surface),
            collector: collector.clone(),
            notifier: notifier.clone(),
        },
    )
    .unwrap();
    bridge.register_plugin("p1", v(1)).await.unwrap();

    Harness {
        bridge: Arc::new(bridge),
        modules,
        pushes,
        collector,
        notifier,
    }
}

fn renderer() -> Vec<Module> {
    vec![Module::new("renderer", Version::new(1, 3, 0))]
}

/// Acknowledge every push, as a well-behaved remote surface would.
fn spawn_acker(bridge: Arc<PluginBridge>, mut pushes: mpsc::Receiver<PushMessage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(push) = pushes.recv().await {
            bridge.acknowledge(push.token).await;
        }
    })
}

// ============================================================================
// Reload Scenarios
// ============================================================================

#[tokio::test]
async fn test_pending_capability_suspends_reload() {
    let h = harness(&["network"], renderer()).await;
    h.bridge
        .request_capabilities("p1", &caps(&["network"]))
        .await
        .unwrap();

    let err = h.bridge.reload("p1", &v(2)).await.unwrap_err();
    assert_eq!(
        err,
        BridgeError::PermissionPending {
            plugin_id: "p1".into(),
            pending: caps(&["network"])
        }
    );
    assert!(err.is_resumable());
    assert_eq!(h.bridge.active_version("p1").await.unwrap(), v(1));

    let session = h.bridge.session("p1").await.unwrap().unwrap();
    assert!(session.suspended);
}

#[tokio::test]
async fn test_denied_capability_rolls_back() {
    let h = harness(&["network"], renderer()).await;
    h.bridge
        .request_capabilities("p1", &caps(&["network"]))
        .await
        .unwrap();
    h.bridge.deny("p1", &caps(&["network"])).await.unwrap();

    let err = h.bridge.reload("p1", &v(2)).await.unwrap_err();
    assert_eq!(
        err,
        BridgeError::PermissionDenied {
            plugin_id: "p1".into(),
            denied: caps(&["network"])
        }
    );

    let record = h.bridge.record("p1").await.unwrap();
    assert_eq!(record.active_version, v(1));
    assert_eq!(record.state, PluginState::RolledBack);
    assert!(h.bridge.session("p1").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_missing_module_exhausts_retries() {
    let h = harness(&[], Vec::new()).await;
    let started = tokio::time::Instant::now();

    let err = h.bridge.reload("p1", &v(2)).await.unwrap_err();
    match err {
        BridgeError::DependencyResolution {
            attempts, reason, ..
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(
                reason,
                ResolutionFailure::MissingModule {
                    module: "renderer".into()
                }
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // 200ms + 400ms of backoff between the three attempts.
    assert!(started.elapsed() >= Duration::from_millis(600));
    assert_eq!(h.bridge.active_version("p1").await.unwrap(), v(1));
    assert_eq!(
        h.bridge.record("p1").await.unwrap().state,
        PluginState::RolledBack
    );
}

#[tokio::test(start_paused = true)]
async fn test_module_appearing_during_backoff_is_used() {
    let h = harness(&[], Vec::new()).await;
    let _acker = spawn_acker(h.bridge.clone(), h.pushes);

    let modules = h.modules.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        modules.add(Module::new("renderer", Version::new(1, 0, 0))).await;
    });

    assert_eq!(h.bridge.reload("p1", &v(2)).await.unwrap(), v(2));
}

#[tokio::test(start_paused = true)]
async fn test_missing_ack_times_out() {
    let mut h = harness(&[], renderer()).await;
    let started = tokio::time::Instant::now();

    let err = h.bridge.reload("p1", &v(2)).await.unwrap_err();
    assert_eq!(
        err,
        BridgeError::ReloadTimeout {
            plugin_id: "p1".into(),
            version: v(2),
            timeout_ms: 5_000
        }
    );
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(h.bridge.active_version("p1").await.unwrap(), v(1));

    // The push did go out; its ack is now stale.
    let push = h.pushes.recv().await.unwrap();
    assert!(!h.bridge.acknowledge(push.token).await);
}

#[tokio::test]
async fn test_unreachable_surface_rolls_back() {
    let h = harness(&[], renderer()).await;
    drop(h.pushes);

    let err = h.bridge.reload("p1", &v(2)).await.unwrap_err();
    assert!(matches!(err, BridgeError::PushFailed { .. }));
    assert_eq!(err.code(), 4005);
    assert_eq!(h.bridge.active_version("p1").await.unwrap(), v(1));
    assert_eq!(
        h.bridge.record("p1").await.unwrap().state,
        PluginState::RolledBack
    );
    assert!(h.bridge.session("p1").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_reload_frees_the_plugin() {
    let h = harness(&[], renderer()).await;
    let waited =
        tokio::time::timeout(Duration::from_millis(100), h.bridge.reload("p1", &v(2))).await;
    assert!(waited.is_err());

    // Nobody acknowledges, so the session times out on its own.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(h.bridge.session("p1").await.unwrap().is_none());
    assert_eq!(
        h.bridge.record("p1").await.unwrap().state,
        PluginState::RolledBack
    );

    let _acker = spawn_acker(h.bridge.clone(), h.pushes);
    assert_eq!(h.bridge.reload("p1", &v(2)).await.unwrap(), v(2));
}

#[tokio::test]
async fn test_happy_path_applies_new_version() {
    let h = harness(&["network"], renderer()).await;
    h.bridge
        .request_capabilities("p1", &caps(&["network"]))
        .await
        .unwrap();
    h.bridge.approve("p1", &caps(&["network"])).await.unwrap();
    let _acker = spawn_acker(h.bridge.clone(), h.pushes);

    assert_eq!(h.bridge.reload("p1", &v(2)).await.unwrap(), v(2));

    let record = h.bridge.record("p1").await.unwrap();
    assert_eq!(record.active_version, v(2));
    assert_eq!(record.last_known_good, v(2));
    assert_eq!(record.state, PluginState::Applied);
    assert!(h.bridge.sessions().await.is_empty());

    let err = h.bridge.reload("p1", &v(2)).await.unwrap_err();
    assert!(matches!(err, BridgeError::AlreadyActive { .. }));
}

#[tokio::test]
async fn test_approve_resumes_suspended_reload() {
    let h = harness(&["network", "webview"], renderer()).await;
    let mut events = h.bridge.subscribe();
    let _acker = spawn_acker(h.bridge.clone(), h.pushes);

    let err = h.bridge.reload("p1", &v(2)).await.unwrap_err();
    assert!(matches!(err, BridgeError::PermissionPending { .. }));

    // Half the approvals: still suspended.
    h.bridge.approve("p1", &caps(&["network"])).await.unwrap();
    assert!(h.bridge.session("p1").await.unwrap().unwrap().suspended);

    h.bridge.approve("p1", &caps(&["webview"])).await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let BridgeEvent::ReloadFinished { outcome, .. } = events.recv().await.unwrap() {
                return outcome;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(outcome, ReloadOutcome::Applied { version: v(2) });
    assert_eq!(h.bridge.active_version("p1").await.unwrap(), v(2));
}

#[tokio::test]
async fn test_deny_cancels_suspended_reload() {
    let h = harness(&["network"], renderer()).await;
    h.bridge.reload("p1", &v(2)).await.unwrap_err();

    h.bridge.deny("p1", &caps(&["network"])).await.unwrap();

    assert!(h.bridge.session("p1").await.unwrap().is_none());
    let record = h.bridge.record("p1").await.unwrap();
    assert_eq!(record.state, PluginState::RolledBack);
    assert_eq!(record.denied, caps(&["network"]));
    assert_eq!(record.active_version, v(1));
}

#[tokio::test(start_paused = true)]
async fn test_deny_cancels_reload_awaiting_ack() {
    let mut h = harness(&["network"], renderer()).await;
    h.bridge
        .request_capabilities("p1", &caps(&["network"]))
        .await
        .unwrap();
    h.bridge.approve("p1", &caps(&["network"])).await.unwrap();

    let reload = {
        let bridge = h.bridge.clone();
        tokio::spawn(async move { bridge.reload("p1", &v(2)).await })
    };
    h.pushes.recv().await.unwrap();
    h.bridge.deny("p1", &caps(&["network"])).await.unwrap();

    let err = reload.await.unwrap().unwrap_err();
    assert!(matches!(err, BridgeError::PermissionDenied { .. }));
    assert_eq!(h.bridge.active_version("p1").await.unwrap(), v(1));
}

#[tokio::test(start_paused = true)]
async fn test_stale_approval_expires() {
    let h = harness(&["network"], renderer()).await;
    h.bridge.reload("p1", &v(2)).await.unwrap_err();

    tokio::time::advance(Duration::from_secs(599)).await;
    assert_eq!(h.bridge.expire_stale_sessions().await, 0);
    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(h.bridge.expire_stale_sessions().await, 1);

    assert_eq!(
        h.bridge.record("p1").await.unwrap().state,
        PluginState::RolledBack
    );
}

#[tokio::test]
async fn test_unknown_plugin() {
    let h = harness(&[], renderer()).await;
    let err = h.bridge.reload("ghost", &v(2)).await.unwrap_err();
    assert_eq!(err, BridgeError::PluginNotFound("ghost".into()));
}

// ============================================================================
// Permission Properties
// ============================================================================

#[tokio::test]
async fn test_request_is_idempotent_through_bridge() {
    let h = harness(&[], renderer()).await;
    let once = h
        .bridge
        .request_capabilities("p1", &caps(&["network", "clipboard"]))
        .await
        .unwrap();
    let twice = h
        .bridge
        .request_capabilities("p1", &caps(&["network", "clipboard"]))
        .await
        .unwrap();
    assert_eq!(once, twice);
}

#[tokio::test]
async fn test_granted_only_widens_through_approve() {
    let h = harness(&[], renderer()).await;
    h.bridge
        .request_capabilities("p1", &caps(&["network"]))
        .await
        .unwrap();
    h.bridge.deny("p1", &caps(&["network"])).await.unwrap();
    let snapshot = h.bridge.approve("p1", &caps(&["network", "process"])).await.unwrap();
    assert!(snapshot.granted.is_empty());
}

// ============================================================================
// Log Bridge
// ============================================================================

#[tokio::test]
async fn test_emit_notification_rules() {
    let h = harness(&[], renderer()).await;
    let mut events = h.bridge.subscribe();

    h.bridge
        .emit(LogEvent::new(LogLevel::Error, "p1", "render crashed"));
    h.bridge.flush_logs().await;

    assert_eq!(h.collector.events.lock().unwrap().len(), 1);
    assert_eq!(h.notifier.seen.lock().unwrap().len(), 1);
    match events.try_recv().unwrap() {
        BridgeEvent::Notification(n) => assert_eq!(n.message, "render crashed"),
        other => panic!("unexpected event: {other:?}"),
    }

    h.bridge
        .emit(LogEvent::new(LogLevel::Error, "p1", "socket reset").retryable(true));
    h.bridge.flush_logs().await;

    assert_eq!(h.collector.events.lock().unwrap().len(), 2);
    assert_eq!(h.notifier.seen.lock().unwrap().len(), 1);

    let stats = h.bridge.log_stats();
    assert_eq!(stats.emitted, 2);
    assert_eq!(stats.forwarded, 2);
    assert_eq!(stats.notified, 1);

    h.bridge.shutdown().await;
}
