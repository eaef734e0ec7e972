//! JSON-RPC API module for the pluginbridge-daemon.
//!
//! This module exposes the bridge to the permission UI, the host runtime
//! and the remote surface over a JSON-RPC interface via TCP.

pub mod handlers;
pub mod server;

pub use server::start_server;
