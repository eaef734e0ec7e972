//! Bridge tunables.
//!
//! Retry counts, backoff curves and timeouts are configuration, not fixed
//! behaviour. Every section has serde defaults so partial configuration
//! files are accepted.

use crate::error::{BridgeError, BridgeResult};
use crate::retry::RetryPolicy;
use pluginbridge_runtime::LogLevel;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// Reload handshake settings.
    pub reload: ReloadConfig,
    /// Retry policy for dependency resolution.
    pub resolver: RetryPolicy,
    /// Log forwarding settings.
    pub logs: LogBridgeConfig,
}

/// Reload handshake configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    /// How long to wait for the remote surface to acknowledge a push.
    /// Default: 5000
    pub ack_timeout_ms: u64,
    /// How long a session may stay suspended waiting for approval.
    /// Default: 600
    pub approval_timeout_secs: u64,
}

/// Log collector bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogBridgeConfig {
    /// Lowest level that raises a user notification for non-retryable events.
    /// Default: error
    pub notify_threshold: LogLevel,
    /// Capacity of the forwarding queue. Events beyond it are dropped.
    /// Default: 1024
    pub queue_capacity: usize,
    /// Retry policy when the collector is unreachable.
    pub forward: RetryPolicy,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 5_000,
            approval_timeout_secs: 600,
        }
    }
}

impl ReloadConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }
}

impl Default for LogBridgeConfig {
    fn default() -> Self {
        Self {
            notify_threshold: LogLevel::Error,
            queue_capacity: 1024,
            forward: RetryPolicy {
                max_attempts: 5,
                base_delay_ms: 500,
                max_delay_ms: 30_000,
                backoff_factor: 2.0,
            },
        }
    }
}

impl BridgeConfig {
    /// Ensure every value is within a usable range.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.reload.ack_timeout_ms == 0 {
            return Err(BridgeError::InvalidConfig(
                "reload.ack_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.reload.approval_timeout_secs == 0 {
            return Err(BridgeError::InvalidConfig(
                "reload.approval_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.logs.queue_capacity == 0 {
            return Err(BridgeError::InvalidConfig(
                "logs.queue_capacity must be greater than 0".to_string(),
            ));
        }
        self.resolver
            .validate()
            .map_err(|e| BridgeError::InvalidConfig(format!("resolver: {e}")))?;
        self.logs
            .forward
            .validate()
            .map_err(|e| BridgeError::InvalidConfig(format!("logs.forward: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.reload.ack_timeout(), Duration::from_secs(5));
        assert_eq!(config.reload.approval_timeout(), Duration::from_secs(600));
        assert_eq!(config.resolver.max_attempts, 3);
        assert_eq!(config.logs.notify_threshold, LogLevel::Error);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"reload": {"ack_timeout_ms": 250}, "logs": {"notify_threshold": "warn"}}"#)
                .unwrap();
        assert_eq!(config.reload.ack_timeout_ms, 250);
        assert_eq!(config.reload.approval_timeout_secs, 600);
        assert_eq!(config.logs.notify_threshold, LogLevel::Warn);
        assert_eq!(config.logs.queue_capacity, 1024);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = BridgeConfig::default();
        config.reload.ack_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(BridgeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_resolver_policy() {
        let mut config = BridgeConfig::default();
        config.resolver.max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
