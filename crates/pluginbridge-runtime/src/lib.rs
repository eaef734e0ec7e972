//! # pluginbridge-runtime
//!
//! Value types shared by every layer of the plugin bridge.
//!
//! This crate provides:
//! - Capability names and capability sets
//! - Plugin manifest parsing (version, required capabilities, module constraints)
//! - Loadable module descriptors and version requirements
//! - Structured log events emitted by plugins
//!
//! ## Manifest Structure
//!
//! A manifest describes one version of one plugin:
//!
//! ```toml
//! capabilities = ["network", "webview"]
//!
//! [plugin]
//! id = "markdown-preview"
//! version = "2.0.0"
//!
//! [[requires]]
//! module = "renderer"
//! version = "^1.4"
//! ```
//!
//! Nothing here performs I/O beyond reading a manifest file on request.

pub mod capability;
pub mod error;
pub mod log_event;
pub mod manifest;
pub mod module;

pub use capability::{Capability, CapabilitySet};
pub use error::{RuntimeError, RuntimeResult};
pub use log_event::{LogEvent, LogLevel};
pub use manifest::{PluginManifest, PluginMetadata};
pub use module::{Module, ModuleRequirement};

/// Re-exported so downstream crates agree on a single version type.
pub use semver::{Version, VersionReq};
