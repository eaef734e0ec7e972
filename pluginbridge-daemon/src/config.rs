//! Configuration file loading and management
//!
//! This module handles loading and parsing the daemon configuration from
//! `$XDG_CONFIG_HOME/pluginbridge/config.toml`. If the configuration file
//! doesn't exist, a default configuration is created with documented comments.

use anyhow::{Context, Result};
use pluginbridge_core::BridgeConfig;
use pluginbridge_runtime::{CapabilitySet, Module, PluginManifest, Version};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    /// Daemon-specific configuration
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Bridge tunables (timeouts, retry policies, log forwarding)
    #[serde(default)]
    pub bridge: BridgeConfig,
    /// External log collector
    #[serde(default)]
    pub collector: CollectorConfig,
    /// Known plugin manifests and loadable modules
    #[serde(default)]
    pub catalog: CatalogConfig,
    /// Installed plugins
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

/// Daemon server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Bind address for the JSON-RPC server
    /// Default: "127.0.0.1:3040"
    pub bind_address: String,
    /// Log level (trace, debug, info, warn, error)
    /// Default: "info"
    pub log_level: String,
    /// How often suspended reloads are checked for approval expiry
    /// Default: 30
    pub session_sweep_secs: u64,
}

/// Log collector configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectorConfig {
    /// Endpoint that receives log events as JSON POSTs.
    /// If None, events are only written to the daemon log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Per-request timeout in milliseconds
    /// Default: 5000
    pub timeout_ms: u64,
}

/// Manifests and modules the bridge resolves against
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CatalogConfig {
    /// Plugin manifest files (TOML) to load at startup
    pub manifest_files: Vec<PathBuf>,
    /// Manifests given inline
    pub manifests: Vec<PluginManifest>,
    /// Modules available for loading
    pub modules: Vec<Module>,
}

/// An installed plugin
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginConfig {
    /// Plugin identifier
    pub id: String,
    /// Version currently installed
    pub version: Version,
    /// Capabilities approved ahead of time
    #[serde(default)]
    pub granted: CapabilitySet,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3040".to_string(),
            log_level: "info".to_string(),
            session_sweep_secs: 30,
        }
    }
}

impl DaemonConfig {
    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_secs)
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: 5_000,
        }
    }
}

impl Config {
    /// Load configuration from the specified path
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// The parsed configuration or an error if loading/parsing fails
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default XDG config location
    ///
    /// If the configuration file doesn't exist, creates a default configuration
    /// file with documented comments.
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_file(&config_path)?;
        }

        Self::load(&config_path)
    }

    /// Get the default configuration file path
    ///
    /// Returns `$XDG_CONFIG_HOME/pluginbridge/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "raibid-labs", "pluginbridge")
            .context("Failed to determine project directories")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Create a default configuration file with documented comments
    pub fn create_default_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, Self::default_config_content())
            .with_context(|| format!("Failed to write default config file: {}", path.display()))?;

        tracing::info!("Created default configuration file at: {}", path.display());
        Ok(())
    }

    /// Generate the default configuration file content with comments
    fn default_config_content() -> String {
        r#"# Plugin Bridge Daemon Configuration

[daemon]
# Bind address for the JSON-RPC API server
# Default: "127.0.0.1:3040"
bind_address = "127.0.0.1:3040"

# Log level: trace, debug, info, warn, error (RUST_LOG overrides)
# Default: "info"
log_level = "info"

# How often (seconds) suspended reloads are checked for approval expiry
# Default: 30
session_sweep_secs = 30

[bridge.reload]
# How long to wait for the remote surface to acknowledge a push
# Default: 5000
ack_timeout_ms = 5000

# How long a reload may wait for capability approval before it is rolled back
# Default: 600
approval_timeout_secs = 600

[bridge.resolver]
# Dependency resolution attempts before giving up, and the backoff between them
max_attempts = 3
base_delay_ms = 200
max_delay_ms = 5000
backoff_factor = 2.0

[bridge.logs]
# Lowest level that raises a notification for non-retryable events
# Default: "error"
notify_threshold = "error"

# Events buffered for forwarding; further events are dropped
# Default: 1024
queue_capacity = 1024

[bridge.logs.forward]
# Retry policy when the collector is unreachable
max_attempts = 5
base_delay_ms = 500
max_delay_ms = 30000
backoff_factor = 2.0

[collector]
# Endpoint receiving log events as JSON POSTs
# If not specified, events only go to the daemon log
# url = "http://127.0.0.1:4318/logs"

# Per-request timeout in milliseconds
timeout_ms = 5000

[catalog]
# Plugin manifest files to load at startup
# manifest_files = ["/usr/share/plugins/weather/2.0.0.toml"]
manifest_files = []

# Example: an inline manifest
# [[catalog.manifests]]
# capabilities = ["network"]
#
# [catalog.manifests.plugin]
# id = "weather"
# version = "2.0.0"
#
# [[catalog.manifests.requires]]
# module = "renderer"
# version = "^1.2"

# Example: a loadable module
# [[catalog.modules]]
# id = "renderer"
# version = "1.4.0"

# Example: an installed plugin
# [[plugins]]
# id = "weather"
# version = "1.0.0"
# granted = ["network"]
"#
        .to_string()
    }

    /// Validate the configuration
    ///
    /// Ensures all configuration values are valid and within acceptable ranges.
    pub fn validate(&self) -> Result<()> {
        self.daemon
            .bind_address
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("Invalid bind_address: {}", self.daemon.bind_address))?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.daemon.log_level.as_str()) {
            anyhow::bail!(
                "Invalid log_level: {}. Must be one of: {}",
                self.daemon.log_level,
                valid_log_levels.join(", ")
            );
        }

        if self.daemon.session_sweep_secs == 0 {
            anyhow::bail!("daemon.session_sweep_secs must be greater than 0");
        }

        self.bridge.validate()?;

        if self.collector.timeout_ms == 0 {
            anyhow::bail!("collector.timeout_ms must be greater than 0");
        }

        for manifest in &self.catalog.manifests {
            manifest
                .validate()
                .with_context(|| format!("Invalid inline manifest for '{}'", manifest.id()))?;
        }

        let mut seen = HashSet::new();
        for plugin in &self.plugins {
            if plugin.id.trim().is_empty() {
                anyhow::bail!("plugins: id must not be empty");
            }
            if !seen.insert(plugin.id.as_str()) {
                anyhow::bail!("Plugin '{}' is listed more than once", plugin.id);
            }
        }

        Ok(())
    }

    /// Every configured manifest: inline ones plus those loaded from files.
    pub fn load_manifests(&self) -> Result<Vec<PluginManifest>> {
        let mut manifests = self.catalog.manifests.clone();
        for path in &self.catalog.manifest_files {
            let manifest = PluginManifest::load(path)
                .with_context(|| format!("Failed to load manifest: {}", path.display()))?;
            manifests.push(manifest);
        }
        Ok(manifests)
    }
}
