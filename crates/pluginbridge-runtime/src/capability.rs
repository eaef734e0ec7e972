//! Capability-based permission model for plugins.
//!
//! A capability is an opaque named permission. Plugins declare the
//! capabilities each version needs in its manifest; the bridge only lets a
//! version go live once every one of them has been explicitly approved.
//!
//! Capabilities serialize as plain snake_case strings, so unknown names
//! round-trip through [`Capability::Custom`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A capability that a plugin can request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Capability {
    /// Access to network (HTTP requests).
    Network,

    /// Read from the filesystem.
    FileRead,

    /// Write to the filesystem.
    FileWrite,

    /// Access to system environment variables.
    Environment,

    /// Spawn subprocesses.
    Process,

    /// Access to stored credentials/tokens.
    Credentials,

    /// Send notifications to the user.
    Notifications,

    /// Access to clipboard.
    Clipboard,

    /// Open URLs in external browser.
    OpenUrl,

    /// Render into a webview panel.
    Webview,

    /// Custom capability for extension.
    Custom(String),
}

impl Capability {
    /// Parse a capability from a string.
    pub fn parse(s: &str) -> Self {
        match s {
            "network" => Capability::Network,
            "file_read" => Capability::FileRead,
            "file_write" => Capability::FileWrite,
            "environment" => Capability::Environment,
            "process" => Capability::Process,
            "credentials" => Capability::Credentials,
            "notifications" => Capability::Notifications,
            "clipboard" => Capability::Clipboard,
            "open_url" => Capability::OpenUrl,
            "webview" => Capability::Webview,
            other => Capability::Custom(other.to_string()),
        }
    }

    /// Convert capability to string representation.
    pub fn as_str(&self) -> &str {
        match self {
            Capability::Network => "network",
            Capability::FileRead => "file_read",
            Capability::FileWrite => "file_write",
            Capability::Environment => "environment",
            Capability::Process => "process",
            Capability::Credentials => "credentials",
            Capability::Notifications => "notifications",
            Capability::Clipboard => "clipboard",
            Capability::OpenUrl => "open_url",
            Capability::Webview => "webview",
            Capability::Custom(s) => s,
        }
    }
}

impl From<String> for Capability {
    fn from(s: String) -> Self {
        Capability::parse(&s)
    }
}

impl From<&str> for Capability {
    fn from(s: &str) -> Self {
        Capability::parse(s)
    }
}

impl From<Capability> for String {
    fn from(cap: Capability) -> Self {
        cap.as_str().to_string()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of capabilities, compared by membership.
///
/// Backed by an ordered set so serialized output is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet {
    capabilities: BTreeSet<Capability>,
}

impl CapabilitySet {
    /// Create an empty capability set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a capability set from a list of capability strings.
    pub fn from_strings<I, S>(strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        strings
            .into_iter()
            .map(|s| Capability::parse(s.as_ref()))
            .collect()
    }

    /// Add a capability. Returns `true` if it was not already present.
    pub fn add(&mut self, cap: Capability) -> bool {
        self.capabilities.insert(cap)
    }

    /// Remove a capability. Returns `true` if it was present.
    pub fn remove(&mut self, cap: &Capability) -> bool {
        self.capabilities.remove(cap)
    }

    /// Check if the set contains a capability.
    pub fn has(&self, cap: &Capability) -> bool {
        self.capabilities.contains(cap)
    }

    /// Check if this set is a superset of another.
    pub fn contains_all(&self, other: &CapabilitySet) -> bool {
        other.capabilities.is_subset(&self.capabilities)
    }

    /// Capabilities present in both sets.
    pub fn intersection(&self, other: &CapabilitySet) -> CapabilitySet {
        self.capabilities
            .intersection(&other.capabilities)
            .cloned()
            .collect()
    }

    /// Capabilities in `self` that are not in `other`.
    pub fn difference(&self, other: &CapabilitySet) -> CapabilitySet {
        self.capabilities
            .difference(&other.capabilities)
            .cloned()
            .collect()
    }

    /// Get all capabilities in the set.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.iter()
    }

    /// Get the number of capabilities.
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self {
            capabilities: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a CapabilitySet {
    type Item = &'a Capability;
    type IntoIter = std::collections::btree_set::Iter<'a, Capability>;

    fn into_iter(self) -> Self::IntoIter {
        self.capabilities.iter()
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(Capability::as_str).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
