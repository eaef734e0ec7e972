//! Sources the bridge consults about plugin versions and loadable modules.
//!
//! Both are traits so the host can back them with whatever it already has.
//! The in-memory implementations here are what the daemon and the tests use.

use async_trait::async_trait;
use pluginbridge_runtime::{Module, PluginManifest};
use semver::Version;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Answers "what does version V of plugin P need?".
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Manifest of `plugin_id` at `version`, if known.
    async fn manifest(&self, plugin_id: &str, version: &Version) -> Option<PluginManifest>;
}

/// Answers "which modules can be loaded right now?".
///
/// Queried afresh on every resolution attempt, since availability may
/// change between attempts.
#[async_trait]
pub trait ModuleCatalog: Send + Sync {
    async fn available(&self) -> Vec<Module>;
}

/// Manifests kept in memory, keyed by plugin id and version.
#[derive(Debug, Default)]
pub struct ManifestCatalog {
    manifests: RwLock<HashMap<(String, Version), PluginManifest>>,
}

impl ManifestCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a manifest.
    pub async fn insert(&self, manifest: PluginManifest) {
        let key = (manifest.id().to_string(), manifest.version().clone());
        debug!(plugin = %key.0, version = %key.1, "Manifest registered");
        self.manifests.write().await.insert(key, manifest);
    }

    /// Known versions of a plugin, ascending.
    pub async fn versions(&self, plugin_id: &str) -> Vec<Version> {
        let mut versions: Vec<Version> = self
            .manifests
            .read()
            .await
            .keys()
            .filter(|(id, _)| id == plugin_id)
            .map(|(_, version)| version.clone())
            .collect();
        versions.sort();
        versions
    }

    pub async fn len(&self) -> usize {
        self.manifests.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.manifests.read().await.is_empty()
    }
}

#[async_trait]
impl ManifestSource for ManifestCatalog {
    async fn manifest(&self, plugin_id: &str, version: &Version) -> Option<PluginManifest> {
        self.manifests
            .read()
            .await
            .get(&(plugin_id.to_string(), version.clone()))
            .cloned()
    }
}

/// Loadable modules kept in memory. Contents may change at runtime.
#[derive(Debug, Default)]
pub struct InMemoryModules {
    modules: RwLock<Vec<Module>>,
}

impl InMemoryModules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_modules(modules: Vec<Module>) -> Self {
        Self {
            modules: RwLock::new(modules),
        }
    }

    /// Make a module loadable. Adding an identical module twice is a no-op.
    pub async fn add(&self, module: Module) {
        let mut modules = self.modules.write().await;
        if !modules.contains(&module) {
            debug!(module = %module, "Module became available");
            modules.push(module);
        }
    }

    /// Remove every version of a module. Returns how many were removed.
    pub async fn remove(&self, module_id: &str) -> usize {
        let mut modules = self.modules.write().await;
        let before = modules.len();
        modules.retain(|m| m.id != module_id);
        before - modules.len()
    }
}

#[async_trait]
impl ModuleCatalog for InMemoryModules {
    async fn available(&self) -> Vec<Module> {
        self.modules.read().await.clone()
    }
}
