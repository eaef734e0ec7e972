//! # pluginbridge-core
//!
//! The plugin bridge: a mediator between a host process and its loaded
//! plugins.
//!
//! This crate provides:
//!
//! - [`PermissionLedger`] - per-plugin granted / pending / denied capabilities
//! - [`DependencyResolver`] - resolves a plugin version's module graph with bounded retry
//! - [`ReloadCoordinator`] - the reload state machine and its acknowledgment handshake
//! - [`LogBridge`] - forwards plugin log events to a collector and raises notifications
//! - [`PluginBridge`] - the facade composing all of the above
//!
//! ## Reload sequence
//!
//! ```text
//! Idle ─▶ PermissionCheck ─▶ DependencyResolve ─▶ Pushing ─▶ AwaitingAck ─┬▶ Applied
//!              │                    │                 │            │       │
//!              └────────────────────┴─────────────────┴────────────┴──────▶ RolledBack
//! ```
//!
//! A session waiting on approval, on retry backoff, or on an acknowledgment
//! is a suspended future or a parked record, never a blocked thread.
//! Operations on one plugin are serialized; different plugins proceed
//! independently.

pub mod bridge;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod ledger;
pub mod logs;
pub mod record;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod surface;

pub use bridge::{BridgeServices, PluginBridge};
pub use catalog::{InMemoryModules, ManifestCatalog, ManifestSource, ModuleCatalog};
pub use config::{BridgeConfig, LogBridgeConfig, ReloadConfig};
pub use coordinator::ReloadCoordinator;
pub use error::{BridgeError, BridgeResult, ResolutionFailure};
pub use events::{BridgeEvent, ReloadOutcome};
pub use ledger::{PermissionLedger, PermissionSnapshot, PermissionStatus};
pub use logs::{Collector, CollectorError, LogBridge, LogStats, Notification, Notifier};
pub use record::{PluginRecord, PluginState};
pub use resolver::{DependencyGraph, DependencyResolver, ResolveFailure, ResolvedGraph, ResolvedModule};
pub use retry::RetryPolicy;
pub use session::{CorrelationToken, ReloadPhase, SessionInfo};
pub use surface::{Acknowledgment, AckRouter, ChannelSurface, PushMessage, RemoteSurface, SurfaceError};
