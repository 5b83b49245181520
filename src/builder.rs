//! Builder for the [`CacheClient`], the single shared instance owned by the
//! composition root.

use std::sync::Arc;
use std::time::Duration;

use crate::client::{CacheClient, ClientConfig};
use crate::error::CacheError;
use crate::events::{EventSink, TracingSink};
use crate::settings::Settings;
use crate::store::Connector;
use crate::stores::memory::{FallbackStore, FallbackStoreConfig};
use crate::stores::redis::{RedisConnector, RedisStoreConfig};

/// Builder for [`CacheClient`].
///
/// # Example
///
/// ```ignore
/// use resilient_cache::{CacheClientBuilder, RedisConnector, RedisStoreConfig};
/// use std::sync::Arc;
///
/// let client = CacheClientBuilder::new()
///     .connector(Arc::new(RedisConnector::new(RedisStoreConfig {
///         url: "redis://localhost:6379".to_string(),
///     })?))
///     .operation_timeout(Duration::from_millis(200))
///     .build();
///
/// client.connect().await;
/// ```
pub struct CacheClientBuilder {
    config: ClientConfig,
    fallback: FallbackStoreConfig,
    connector: Option<Arc<dyn Connector>>,
    sink: Arc<dyn EventSink>,
}

impl CacheClientBuilder {
    /// Create a new builder: no remote, default timings, events logged via `tracing`.
    pub fn new() -> Self {
        CacheClientBuilder {
            config: ClientConfig::default(),
            fallback: FallbackStoreConfig::default(),
            connector: None,
            sink: Arc::new(TracingSink),
        }
    }

    /// Configure the remote cache and the fallback store from settings.
    ///
    /// Without a URL the client runs on the fallback store alone.
    pub fn from_settings(settings: &Settings) -> Result<Self, CacheError> {
        let mut builder = CacheClientBuilder::new()
            .config(settings.remote.client_config())
            .fallback(settings.fallback.store_config());

        if let Some(url) = settings.remote.url.as_deref() {
            let connector = RedisConnector::new(RedisStoreConfig {
                url: url.to_string(),
            })?;
            builder = builder.connector(Arc::new(connector));
        }

        Ok(builder)
    }

    /// Use the given remote cache.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replace all timings at once.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.config.operation_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn max_connect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_connect_attempts = attempts;
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    /// `None` disables background recovery after a mid-flight failure.
    pub fn reconnect_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.reconnect_interval = interval;
        self
    }

    pub fn fallback(mut self, config: FallbackStoreConfig) -> Self {
        self.fallback = config;
        self
    }

    /// Receive state transitions and absorbed failures.
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Build the client. It starts `Disconnected`; call `connect()` at startup.
    pub fn build(self) -> CacheClient {
        CacheClient::new(
            self.config,
            Arc::new(FallbackStore::new(self.fallback)),
            self.connector,
            self.sink,
        )
    }
}

impl Default for CacheClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConnectionState;

    #[tokio::test]
    async fn test_builder_applies_timings() {
        let client = CacheClientBuilder::new()
            .operation_timeout(Duration::from_millis(50))
            .max_connect_attempts(5)
            .default_ttl(Duration::from_secs(10))
            .reconnect_interval(None)
            .build();

        assert_eq!(client.config().operation_timeout, Duration::from_millis(50));
        assert_eq!(client.config().max_connect_attempts, 5);
        assert_eq!(client.config().default_ttl, Duration::from_secs(10));
        assert!(client.config().reconnect_interval.is_none());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_from_settings_without_url_is_local_only() {
        let settings = Settings::default();
        let client = CacheClientBuilder::from_settings(&settings).unwrap().build();

        assert_eq!(client.connect().await, ConnectionState::Degraded);
    }

    #[test]
    fn test_from_settings_rejects_bad_url() {
        let mut settings = Settings::default();
        settings.remote.url = Some("not a url".to_string());
        assert!(CacheClientBuilder::from_settings(&settings).is_err());
    }
}
