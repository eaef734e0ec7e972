//! Error taxonomy for the plugin bridge.
//!
//! Terminal conditions (denial, exhausted retries, timeout) always surface
//! as one of these variants and always leave the plugin at a well-defined
//! active version. Transient conditions are absorbed with bounded backoff
//! and never appear here individually.

use pluginbridge_runtime::CapabilitySet;
use semver::{Version, VersionReq};
use thiserror::Error;

/// Why a single dependency resolution attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionFailure {
    /// No loadable module with this id exists.
    #[error("module '{module}' is not available")]
    MissingModule { module: String },

    /// Modules with this id exist but none satisfies the constraint.
    #[error("no available version of '{module}' satisfies {requirement} (available: {})", format_versions(.available))]
    Unsatisfiable {
        module: String,
        requirement: VersionReq,
        available: Vec<Version>,
    },

    /// There is no manifest for the requested plugin version.
    #[error("no manifest for {plugin_id}@{version}")]
    UnknownVersion { plugin_id: String, version: Version },
}

impl ResolutionFailure {
    /// Whether another attempt could succeed once module availability changes.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ResolutionFailure::UnknownVersion { .. })
    }
}

fn format_versions(versions: &[Version]) -> String {
    let parts: Vec<String> = versions.iter().map(Version::to_string).collect();
    parts.join(", ")
}

/// Errors returned by the bridge.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// The plugin id is not registered.
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    /// The plugin id is already registered.
    #[error("Plugin already registered: {0}")]
    AlreadyRegistered(String),

    /// Required capabilities are requested but not yet approved.
    #[error("Plugin '{plugin_id}' is waiting for approval of {pending}")]
    PermissionPending {
        plugin_id: String,
        pending: CapabilitySet,
    },

    /// Required capabilities were explicitly denied.
    #[error("Plugin '{plugin_id}' was denied {denied}")]
    PermissionDenied {
        plugin_id: String,
        denied: CapabilitySet,
    },

    /// Dependency graph stayed unsatisfiable for the whole retry budget.
    #[error("Could not resolve dependencies of {plugin_id}@{version} after {attempts} attempt(s): {reason}")]
    DependencyResolution {
        plugin_id: String,
        version: Version,
        attempts: u32,
        reason: ResolutionFailure,
    },

    /// The remote surface did not acknowledge the push in time.
    #[error("Remote surface did not acknowledge {plugin_id}@{version} within {timeout_ms}ms")]
    ReloadTimeout {
        plugin_id: String,
        version: Version,
        timeout_ms: u64,
    },

    /// Another reload session for this plugin is in flight.
    #[error("Plugin '{plugin_id}' already has a reload to {target} in flight")]
    ReloadInProgress { plugin_id: String, target: Version },

    /// The requested version is already the active one.
    #[error("Plugin '{plugin_id}' is already at {version}")]
    AlreadyActive { plugin_id: String, version: Version },

    /// No manifest is known for the requested version.
    #[error("No manifest for {plugin_id}@{version}")]
    UnknownVersion { plugin_id: String, version: Version },

    /// The remote surface could not be reached.
    #[error("Failed to push {plugin_id} to the remote surface: {reason}")]
    PushFailed { plugin_id: String, reason: String },

    /// The reload was cancelled by the host.
    #[error("Reload of '{0}' was cancelled")]
    Cancelled(String),

    /// The session waited for approval longer than allowed.
    #[error("Reload of '{0}' expired while waiting for approval")]
    ApprovalExpired(String),

    /// Configuration values are out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeError {
    /// Stable numeric code, used by RPC layers to tag error objects.
    pub fn code(&self) -> i32 {
        match self {
            BridgeError::PluginNotFound(_) => 1001,
            BridgeError::AlreadyRegistered(_) => 1002,
            BridgeError::PermissionPending { .. } => 2001,
            BridgeError::PermissionDenied { .. } => 2002,
            BridgeError::DependencyResolution { .. } => 3001,
            BridgeError::ReloadTimeout { .. } => 4001,
            BridgeError::ReloadInProgress { .. } => 4002,
            BridgeError::AlreadyActive { .. } => 4003,
            BridgeError::UnknownVersion { .. } => 4004,
            BridgeError::PushFailed { .. } => 4005,
            BridgeError::Cancelled(_) => 4006,
            BridgeError::ApprovalExpired(_) => 4007,
            BridgeError::InvalidConfig(_) => 5001,
        }
    }

    /// Whether the session that produced this error is still alive and resumable.
    pub fn is_resumable(&self) -> bool {
        matches!(self, BridgeError::PermissionPending { .. })
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
