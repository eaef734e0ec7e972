//! Assembles a running bridge from the daemon configuration.

use anyhow::{Context, Result};
use pluginbridge_core::{
    BridgeServices, ChannelSurface, InMemoryModules, ManifestCatalog, PluginBridge, PushMessage,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::collector::{self, LogNotifier};
use crate::config::Config;

/// Pushes buffered for the remote surface before `push` starts waiting.
const SURFACE_CAPACITY: usize = 64;

/// A bridge plus the receiving end of its remote surface channel.
pub struct BridgeHost {
    pub bridge: Arc<PluginBridge>,
    pub pushes: mpsc::Receiver<PushMessage>,
}

/// Build the bridge, load the catalog and register the configured plugins.
///
/// Must be called from within a tokio runtime.
pub async fn build(config: &Config) -> Result<BridgeHost> {
    let manifests = Arc::new(ManifestCatalog::new());
    for manifest in config.load_manifests()? {
        manifests.insert(manifest).await;
    }
    let modules = Arc::new(InMemoryModules::with_modules(config.catalog.modules.clone()));
    let (surface, pushes) = ChannelSurface::new(SURFACE_CAPACITY);

    info!(
        manifests = manifests.len().await,
        modules = config.catalog.modules.len(),
        collector = config.collector.url.as_deref().unwrap_or("local"),
        "Loaded plugin catalog"
    );

    let bridge = PluginBridge::new(
        config.bridge.clone(),
        BridgeServices {
            manifests,
            modules,
            surface: Arc::new(surface),
            collector: collector::from_config(&config.collector),
            notifier: Arc::new(LogNotifier),
        },
    )
    .context("Failed to start plugin bridge")?;

    for plugin in &config.plugins {
        bridge
            .register_plugin(&plugin.id, plugin.version.clone())
            .await
            .with_context(|| format!("Failed to register plugin '{}'", plugin.id))?;

        if !plugin.granted.is_empty() {
            bridge.request_capabilities(&plugin.id, &plugin.granted).await?;
            bridge.approve(&plugin.id, &plugin.granted).await?;
            debug!(plugin = %plugin.id, granted = %plugin.granted, "Applied pre-approved capabilities");
        }
    }

    Ok(BridgeHost {
        bridge: Arc::new(bridge),
        pushes,
    })
}

/// Periodically roll back reloads that waited too long for approval.
pub fn spawn_session_sweeper(bridge: Arc<PluginBridge>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick fires immediately; nothing can be stale yet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let expired = bridge.expire_stale_sessions().await;
            if expired > 0 {
                info!(expired, "Rolled back reloads awaiting approval");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginConfig;
    use pluginbridge_runtime::{CapabilitySet, PluginManifest, Version};

    #[tokio::test]
    async fn test_build_registers_plugins() {
        let mut config = Config::default();
        config
            .catalog
            .manifests
            .push(PluginManifest::new("weather", Version::new(2, 0, 0)));
        config.plugins.push(PluginConfig {
            id: "weather".to_string(),
            version: Version::new(1, 0, 0),
            granted: CapabilitySet::from_strings(["network"]),
        });

        let host = build(&config).await.unwrap();
        let record = host.bridge.record("weather").await.unwrap();
        assert_eq!(record.active_version, Version::new(1, 0, 0));
        assert_eq!(record.granted, CapabilitySet::from_strings(["network"]));
        assert!(record.pending.is_empty());

        host.bridge.shutdown().await;
    }
}
