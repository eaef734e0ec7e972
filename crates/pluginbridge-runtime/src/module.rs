//! Loadable modules and the version constraints plugins place on them.

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A module the host can currently load, at a concrete version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Module {
    /// Module identifier.
    pub id: String,

    /// Concrete module version.
    pub version: Version,
}

impl Module {
    /// Create a module descriptor.
    pub fn new(id: impl Into<String>, version: Version) -> Self {
        Self {
            id: id.into(),
            version,
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

/// A module a plugin version depends on, with a version constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRequirement {
    /// Required module identifier.
    pub module: String,

    /// Accepted versions. Defaults to any version.
    #[serde(default = "any_version")]
    pub version: VersionReq,
}

fn any_version() -> VersionReq {
    VersionReq::STAR
}

impl ModuleRequirement {
    /// Create a requirement.
    pub fn new(module: impl Into<String>, version: VersionReq) -> Self {
        Self {
            module: module.into(),
            version,
        }
    }

    /// Whether `module` fulfils this requirement.
    pub fn is_satisfied_by(&self, module: &Module) -> bool {
        module.id == self.module && self.version.matches(&module.version)
    }
}

impl fmt::Display for ModuleRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.module, self.version)
    }
}
