use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CacheError;

/// A store is a common interface for the cache primitives.
///
/// Both the remote cache service and the in-process fallback implement it, so the
/// [`CacheClient`](crate::CacheClient) can run the same operation against either one.
/// Keys are validated by the client before they reach a store.
#[async_trait]
pub trait Store: Send + Sync {
    /// A name for logging.
    ///
    /// # Example
    /// - "fallback"
    /// - "redis"
    fn name(&self) -> &'static str;

    /// Return the stored bytes.
    ///
    /// The response must be `None` for missing or expired keys.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Upsert the value, expiring `ttl` from now.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    /// Remove the key. Missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Whether the key is present and not expired.
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Atomically add one to the counter at `key`.
    ///
    /// A missing key starts at 1 with no expiry. An existing deadline is kept.
    async fn increment(&self, key: &str) -> Result<i64, CacheError>;

    /// Overwrite the deadline of an existing key. No-op for missing keys.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Remaining lifetime of the key.
    ///
    /// `None` when the key is missing or has no deadline.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;

    /// Heartbeat used to detect that a degraded remote has recovered.
    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Opens a handle to the remote cache service.
///
/// The client calls this on `connect()` and from the background recovery task.
#[async_trait]
pub trait Connector: Send + Sync {
    /// A name for logging.
    fn name(&self) -> &'static str;

    /// Perform the handshake and return a ready store.
    async fn connect(&self) -> Result<Arc<dyn Store>, CacheError>;
}
