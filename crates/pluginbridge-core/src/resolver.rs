//! Dependency resolution with bounded retry.
//!
//! Each attempt builds a fresh [`DependencyGraph`] from the manifest and
//! satisfies it against a fresh snapshot of loadable modules. An attempt
//! either resolves every requirement or none: there is no partial graph.
//! A failed attempt schedules the next one according to the
//! [`RetryPolicy`], and the follow-up starts again from scratch.

use chrono::{DateTime, Utc};
use pluginbridge_runtime::{Module, ModuleRequirement, PluginManifest};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::catalog::{ManifestSource, ModuleCatalog};
use crate::error::{BridgeError, BridgeResult, ResolutionFailure};
use crate::retry::RetryPolicy;
use crate::session::{cancelled, pending_cancel, CancelReason};

/// Required modules of one plugin version. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub plugin_id: String,
    pub version: Version,
    pub requirements: Vec<ModuleRequirement>,
}

impl DependencyGraph {
    pub fn from_manifest(manifest: &PluginManifest) -> Self {
        Self {
            plugin_id: manifest.id().to_string(),
            version: manifest.version().clone(),
            requirements: manifest.requires.clone(),
        }
    }

    /// Satisfy every requirement against `available`, choosing the highest
    /// matching version of each module.
    pub fn satisfy(&self, available: &[Module]) -> Result<ResolvedGraph, ResolutionFailure> {
        let mut modules = Vec::with_capacity(self.requirements.len());

        for requirement in &self.requirements {
            let candidates: Vec<&Module> = available
                .iter()
                .filter(|m| m.id == requirement.module)
                .collect();

            if candidates.is_empty() {
                return Err(ResolutionFailure::MissingModule {
                    module: requirement.module.clone(),
                });
            }

            let chosen = candidates
                .iter()
                .filter(|m| requirement.version.matches(&m.version))
                .max_by(|a, b| a.version.cmp(&b.version));

            match chosen {
                Some(module) => modules.push(ResolvedModule {
                    requirement: requirement.clone(),
                    module: (*module).clone(),
                }),
                None => {
                    let mut versions: Vec<Version> =
                        candidates.iter().map(|m| m.version.clone()).collect();
                    versions.sort();
                    versions.dedup();
                    return Err(ResolutionFailure::Unsatisfiable {
                        module: requirement.module.clone(),
                        requirement: requirement.version.clone(),
                        available: versions,
                    });
                }
            }
        }

        Ok(ResolvedGraph {
            plugin_id: self.plugin_id.clone(),
            version: self.version.clone(),
            modules,
            resolved_at: Utc::now(),
        })
    }
}

/// A requirement paired with the module chosen for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedModule {
    pub requirement: ModuleRequirement,
    pub module: Module,
}

/// A fully satisfied dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedGraph {
    pub plugin_id: String,
    pub version: Version,
    pub modules: Vec<ResolvedModule>,
    pub resolved_at: DateTime<Utc>,
}

/// Outcome of a single failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveFailure {
    pub reason: ResolutionFailure,
    /// 1-based number of the attempt that failed.
    pub attempt: u32,
    /// When the follow-up attempt is scheduled; `None` once the budget is
    /// spent or the failure cannot be fixed by waiting.
    pub retry_after: Option<Duration>,
}

/// Why a retrying resolution stopped without a graph.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ResolveError {
    Exhausted {
        reason: ResolutionFailure,
        attempts: u32,
    },
    Cancelled(CancelReason),
}

/// Resolves plugin versions against the currently loadable modules.
pub struct DependencyResolver {
    manifests: Arc<dyn ManifestSource>,
    modules: Arc<dyn ModuleCatalog>,
    policy: RetryPolicy,
}

impl DependencyResolver {
    pub fn new(
        manifests: Arc<dyn ManifestSource>,
        modules: Arc<dyn ModuleCatalog>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            manifests,
            modules,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Build the dependency graph of a plugin version.
    pub async fn graph(
        &self,
        plugin_id: &str,
        version: &Version,
    ) -> Result<DependencyGraph, ResolutionFailure> {
        self.manifests
            .manifest(plugin_id, version)
            .await
            .map(|manifest| DependencyGraph::from_manifest(&manifest))
            .ok_or_else(|| ResolutionFailure::UnknownVersion {
                plugin_id: plugin_id.to_string(),
                version: version.clone(),
            })
    }

    /// Run exactly one resolution attempt.
    pub async fn attempt(
        &self,
        plugin_id: &str,
        version: &Version,
        attempt: u32,
    ) -> Result<ResolvedGraph, ResolveFailure> {
        debug!(plugin = %plugin_id, %version, attempt, "Resolving dependencies");

        let outcome = match self.graph(plugin_id, version).await {
            Ok(graph) => {
                let available = self.modules.available().await;
                graph.satisfy(&available)
            }
            Err(reason) => Err(reason),
        };

        outcome.map_err(|reason| {
            let retry_after = if reason.is_retryable() {
                self.policy.delay_after(attempt)
            } else {
                None
            };
            ResolveFailure {
                reason,
                attempt,
                retry_after,
            }
        })
    }

    /// Resolve, retrying with backoff until success or the budget is spent.
    pub async fn resolve(&self, plugin_id: &str, version: &Version) -> BridgeResult<ResolvedGraph> {
        self.run(plugin_id, version, None)
            .await
            .map_err(|err| match err {
                ResolveError::Exhausted { reason, attempts } => {
                    exhausted_error(plugin_id, version, reason, attempts)
                }
                ResolveError::Cancelled(reason) => reason.into_error(plugin_id),
            })
    }

    /// Like [`resolve`](Self::resolve), but stops as soon as `cancel` fires.
    pub(crate) async fn resolve_until(
        &self,
        plugin_id: &str,
        version: &Version,
        cancel: &mut watch::Receiver<Option<CancelReason>>,
    ) -> Result<ResolvedGraph, ResolveError> {
        self.run(plugin_id, version, Some(cancel)).await
    }

    async fn run(
        &self,
        plugin_id: &str,
        version: &Version,
        mut cancel: Option<&mut watch::Receiver<Option<CancelReason>>>,
    ) -> Result<ResolvedGraph, ResolveError> {
        let mut attempt = 1;
        loop {
            if let Some(reason) = cancel.as_deref().and_then(pending_cancel) {
                return Err(ResolveError::Cancelled(reason));
            }

            let failure = match self.attempt(plugin_id, version, attempt).await {
                Ok(graph) => {
                    info!(
                        plugin = %plugin_id,
                        %version,
                        attempt,
                        modules = graph.modules.len(),
                        "Dependencies resolved"
                    );
                    return Ok(graph);
                }
                Err(failure) => failure,
            };

            let Some(delay) = failure.retry_after else {
                warn!(
                    plugin = %plugin_id,
                    %version,
                    attempts = attempt,
                    reason = %failure.reason,
                    "Dependency resolution gave up"
                );
                return Err(ResolveError::Exhausted {
                    reason: failure.reason,
                    attempts: attempt,
                });
            };

            warn!(
                plugin = %plugin_id,
                %version,
                attempt,
                reason = %failure.reason,
                retry_in_ms = delay.as_millis() as u64,
                "Dependency resolution failed, retry scheduled"
            );

            match cancel.as_deref_mut() {
                Some(rx) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        reason = cancelled(rx) => return Err(ResolveError::Cancelled(reason)),
                    }
                }
                None => tokio::time::sleep(delay).await,
            }

            attempt += 1;
        }
    }
}

pub(crate) fn exhausted_error(
    plugin_id: &str,
    version: &Version,
    reason: ResolutionFailure,
    attempts: u32,
) -> BridgeError {
    BridgeError::DependencyResolution {
        plugin_id: plugin_id.to_string(),
        version: version.clone(),
        attempts,
        reason,
    }
}
