//! Error types for the shared runtime types.

use thiserror::Error;

/// Errors raised while building or parsing runtime values.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Manifest parsed but failed validation.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// A version or version requirement string was malformed.
    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] semver::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;
