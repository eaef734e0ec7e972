//! Plugin manifest parsing.
//!
//! A manifest describes a single version of a plugin: which capabilities it
//! needs and which modules it must be able to load.

use crate::capability::CapabilitySet;
use crate::error::{RuntimeError, RuntimeResult};
use crate::module::ModuleRequirement;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Plugin manifest structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Required capabilities.
    #[serde(default)]
    pub capabilities: CapabilitySet,

    /// Plugin metadata.
    pub plugin: PluginMetadata,

    /// Required modules with version constraints.
    #[serde(default)]
    pub requires: Vec<ModuleRequirement>,
}

/// Plugin metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique identifier for the plugin.
    pub id: String,

    /// Version this manifest describes.
    pub version: Version,

    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,

    /// Plugin description.
    #[serde(default)]
    pub description: Option<String>,
}

impl PluginManifest {
    /// Build a manifest in code.
    pub fn new(id: impl Into<String>, version: Version) -> Self {
        Self {
            capabilities: CapabilitySet::new(),
            plugin: PluginMetadata {
                id: id.into(),
                version,
                name: None,
                description: None,
            },
            requires: Vec::new(),
        }
    }

    /// Set the required capabilities.
    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Add a module requirement.
    pub fn with_requirement(mut self, requirement: ModuleRequirement) -> Self {
        self.requires.push(requirement);
        self
    }

    /// Parse and validate a manifest from TOML text.
    pub fn parse(content: &str) -> RuntimeResult<Self> {
        let manifest: PluginManifest = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Read and parse a manifest file.
    pub fn load(path: impl AsRef<Path>) -> RuntimeResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Check the manifest for missing ids and duplicate module requirements.
    pub fn validate(&self) -> RuntimeResult<()> {
        if self.plugin.id.trim().is_empty() {
            return Err(RuntimeError::InvalidManifest("plugin.id is empty".into()));
        }

        let mut seen = HashSet::new();
        for req in &self.requires {
            if req.module.trim().is_empty() {
                return Err(RuntimeError::InvalidManifest(format!(
                    "plugin '{}' has a requirement with an empty module id",
                    self.plugin.id
                )));
            }
            if !seen.insert(req.module.as_str()) {
                return Err(RuntimeError::InvalidManifest(format!(
                    "plugin '{}' requires module '{}' more than once",
                    self.plugin.id, req.module
                )));
            }
        }

        Ok(())
    }

    /// Plugin id.
    pub fn id(&self) -> &str {
        &self.plugin.id
    }

    /// Plugin version.
    pub fn version(&self) -> &Version {
        &self.plugin.version
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.plugin.name.as_deref().unwrap_or(&self.plugin.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;

    const MANIFEST: &str = r#"
capabilities = ["network", "webview"]

[plugin]
id = "markdown-preview"
name = "Markdown Preview"
version = "2.0.0"

[[requires]]
module = "renderer"
version = "^1.4"

[[requires]]
module = "theme"
"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = PluginManifest::parse(MANIFEST).unwrap();
        assert_eq!(manifest.id(), "markdown-preview");
        assert_eq!(manifest.version(), &Version::new(2, 0, 0));
        assert_eq!(manifest.display_name(), "Markdown Preview");
        assert!(manifest.capabilities.has(&Capability::Network));
        assert!(manifest.capabilities.has(&Capability::Webview));
        assert_eq!(manifest.requires.len(), 2);
    }

    #[test]
    fn test_rejects_duplicate_requirement() {
        let content = r#"
[plugin]
id = "p1"
version = "1.0.0"

[[requires]]
module = "renderer"

[[requires]]
module = "renderer"
version = "^2"
"#;
        let err = PluginManifest::parse(content).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidManifest(_)));
    }

    #[test]
    fn test_rejects_bad_version() {
        let content = r#"
[plugin]
id = "p1"
version = "one"
"#;
        assert!(matches!(
            PluginManifest::parse(content),
            Err(RuntimeError::Toml(_))
        ));
    }

    #[test]
    fn test_builder() {
        let manifest = PluginManifest::new("p1", Version::new(2, 0, 0))
            .with_capabilities(CapabilitySet::from_strings(["network"]))
            .with_requirement(ModuleRequirement::new(
                "renderer",
                semver::VersionReq::parse(">=1").unwrap(),
            ));
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.display_name(), "p1");
    }
}
