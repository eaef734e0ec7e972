//! Collector and notifier implementations used by the daemon.

use async_trait::async_trait;
use pluginbridge_core::{Collector, CollectorError, Notification, Notifier};
use pluginbridge_runtime::LogEvent;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

use crate::config::CollectorConfig;

/// Posts each log event as JSON to an HTTP endpoint.
pub struct HttpCollector {
    client: Client,
    url: String,
}

impl HttpCollector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .user_agent(concat!("pluginbridge/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Collector for HttpCollector {
    async fn forward(&self, event: &LogEvent) -> Result<(), CollectorError> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| CollectorError::Unreachable(e.to_string()))?;

        response
            .error_for_status()
            .map(|_| ())
            .map_err(|e| CollectorError::Rejected(e.to_string()))
    }
}

/// Accepts every event without sending it anywhere. Events still appear in
/// the daemon log, since the bridge mirrors them into `tracing`.
#[derive(Debug, Default)]
pub struct LocalCollector;

#[async_trait]
impl Collector for LocalCollector {
    async fn forward(&self, event: &LogEvent) -> Result<(), CollectorError> {
        trace!(plugin = %event.plugin_id, "No collector configured, keeping event local");
        Ok(())
    }
}

/// Pick the collector described by the configuration.
pub fn from_config(config: &CollectorConfig) -> Arc<dyn Collector> {
    match &config.url {
        Some(url) => Arc::new(HttpCollector::new(
            url.clone(),
            Duration::from_millis(config.timeout_ms),
        )),
        None => Arc::new(LocalCollector),
    }
}

/// Surfaces notifications in the daemon log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        warn!(
            plugin = %notification.plugin_id,
            level = %notification.level,
            "Plugin notification: {}",
            notification.message
        );
    }
}
