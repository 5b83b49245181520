use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::builder::CacheClientBuilder;
use crate::error::CacheError;
use crate::events::{CacheEvent, EventSink};
use crate::state::{ConnectionState, StateCell};
use crate::store::{Connector, Store};
use crate::stores::memory::FallbackStore;
use crate::utils::{validate_key, validate_ttl};

/// Timing and retry policy of the [`CacheClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound for a single remote operation. Slower calls count as failures.
    pub operation_timeout: Duration,

    /// Upper bound for a single handshake attempt.
    pub connect_timeout: Duration,

    /// Handshake attempts made by `connect()` before giving up and degrading.
    pub max_connect_attempts: u32,

    /// Delay before retry `n` is `min(n * backoff_base, backoff_cap)`.
    pub backoff_base: Duration,
    pub backoff_cap: Duration,

    /// TTL applied by `set` when the caller passes `None`.
    pub default_ttl: Duration,

    /// How often a client that lost its remote mid-flight tries to get it back.
    /// `None` disables background recovery.
    pub reconnect_interval: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            operation_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(2),
            max_connect_attempts: 3,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_millis(3000),
            default_ttl: Duration::from_secs(3600),
            reconnect_interval: Some(Duration::from_secs(5)),
        }
    }
}

impl ClientConfig {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_base
            .checked_mul(attempt)
            .unwrap_or(self.backoff_cap)
            .min(self.backoff_cap)
    }
}

struct ClientInner {
    fallback: Arc<FallbackStore>,
    connector: Option<Arc<dyn Connector>>,
    remote: RwLock<Option<Arc<dyn Store>>>,
    state: StateCell,
    config: ClientConfig,
    /// Owner of the background recovery task: its generation plus one, 0 when none.
    /// A task only releases the slot while it still holds it.
    recovery_owner: AtomicU64,
    /// Bumped by `disconnect()`; stale handshakes and recovery loops check it.
    generation: AtomicU64,
}

/// Cache client that prefers the remote cache and silently falls back to an
/// in-process store.
///
/// Every operation follows the same path: when the client is `Connected` it tries the
/// remote store (bounded by `operation_timeout`); any remote failure moves the client
/// to `Degraded` and the very same call is answered by the fallback store. In every
/// other state the fallback store answers directly. The only errors callers see are
/// their own input errors (bad key, zero TTL, incrementing a non-integer).
///
/// The client is cheap to clone; clones share the connection and the fallback store.
/// Build one at startup and hand clones to the rate limiter and read-through cache.
///
/// # Example
/// ```ignore
/// let client = CacheClient::builder()
///     .connector(Arc::new(RedisConnector::new(RedisStoreConfig {
///         url: "redis://localhost:6379".to_string(),
///     })?))
///     .build();
/// client.connect().await;
///
/// client.set("greeting", b"hello", None).await?;
/// assert_eq!(client.get("greeting").await?, Some(b"hello".to_vec()));
/// ```
#[derive(Clone)]
pub struct CacheClient {
    inner: Arc<ClientInner>,
}

impl CacheClient {
    /// Start building a client.
    pub fn builder() -> CacheClientBuilder {
        CacheClientBuilder::new()
    }

    pub(crate) fn new(
        config: ClientConfig,
        fallback: Arc<FallbackStore>,
        connector: Option<Arc<dyn Connector>>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        CacheClient {
            inner: Arc::new(ClientInner {
                fallback,
                connector,
                remote: RwLock::new(None),
                state: StateCell::new(sink),
                config,
                recovery_owner: AtomicU64::new(0),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The in-process store used while the remote is unavailable.
    pub fn fallback(&self) -> &Arc<FallbackStore> {
        &self.inner.fallback
    }

    /// Connect to the remote cache.
    ///
    /// Makes up to `max_connect_attempts` handshakes with capped linear backoff. On
    /// success the client is `Connected`; otherwise it is `Degraded` and stays there
    /// until [`reconnect`](Self::reconnect) is called. Without a configured remote the
    /// client goes straight to `Degraded`. Never fails; returns the resulting state.
    pub async fn connect(&self) -> ConnectionState {
        let Some(connector) = self.inner.connector.clone() else {
            if self
                .inner
                .state
                .transition(ConnectionState::Disconnected, ConnectionState::Degraded)
            {
                tracing::info!("no remote cache configured, serving from the fallback store");
            }
            return self.state();
        };

        let current = self.state();
        if matches!(
            current,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            return current;
        }

        let generation = self.inner.generation.load(Ordering::Acquire);
        if !self
            .inner
            .state
            .transition(current, ConnectionState::Connecting)
        {
            return self.state();
        }

        let config = &self.inner.config;
        let attempts = config.max_connect_attempts.max(1);

        for attempt in 1..=attempts {
            tracing::debug!(attempt, connector = connector.name(), "connecting to remote cache");

            let error = match tokio::time::timeout(config.connect_timeout, connector.connect()).await
            {
                Ok(Ok(store)) => {
                    if self
                        .install(store, ConnectionState::Connecting, generation)
                        .await
                    {
                        tracing::info!(attempt, "connected to remote cache");
                    }
                    return self.state();
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!(
                    "handshake timed out after {}ms",
                    config.connect_timeout.as_millis()
                ),
            };

            self.inner
                .state
                .sink()
                .emit(CacheEvent::ConnectAttemptFailed { attempt, error });

            // disconnect() was called while we were trying.
            if self.state() != ConnectionState::Connecting {
                return self.state();
            }

            if attempt < attempts {
                tokio::time::sleep(config.backoff_delay(attempt)).await;
            }
        }

        if self
            .inner
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Degraded)
        {
            tracing::warn!(
                attempts,
                "remote cache unreachable, serving from the fallback store"
            );
        }
        self.state()
    }

    /// Explicitly retry the connection after the client degraded.
    pub async fn reconnect(&self) -> ConnectionState {
        self.connect().await
    }

    /// Release the remote handle and stop background recovery.
    ///
    /// `Connected` and `Connecting` move to `Disconnected`. Calling this while already
    /// disconnected or degraded changes no state and never fails.
    pub async fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        // Recovery of the old generation is abandoned; a later degrade may start anew.
        self.inner.recovery_owner.store(0, Ordering::Release);

        let current = self.state();
        if matches!(
            current,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            self.inner
                .state
                .transition(current, ConnectionState::Disconnected);
        }

        if self.inner.remote.write().await.take().is_some() {
            tracing::info!("remote cache handle released");
        }
    }

    /// Return the cached bytes, `None` on a miss.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        validate_key(key)?;
        if let Some(result) = self
            .try_remote("get", key, |remote| async move { remote.get(key).await })
            .await
        {
            return result;
        }
        self.inner.fallback.get(key).await
    }

    /// Store the bytes. `None` applies the configured default TTL.
    pub async fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        validate_key(key)?;
        let ttl = ttl.unwrap_or(self.inner.config.default_ttl);
        validate_ttl(ttl)?;

        if let Some(result) = self
            .try_remote("set", key, |remote| async move {
                remote.set(key, value, ttl).await
            })
            .await
        {
            return result;
        }
        self.inner.fallback.set(key, value, ttl).await
    }

    /// Remove the key. Missing keys are not an error.
    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        validate_key(key)?;
        if let Some(result) = self
            .try_remote("delete", key, |remote| async move {
                remote.delete(key).await
            })
            .await
        {
            return result;
        }
        self.inner.fallback.delete(key).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        validate_key(key)?;
        if let Some(result) = self
            .try_remote("exists", key, |remote| async move {
                remote.exists(key).await
            })
            .await
        {
            return result;
        }
        self.inner.fallback.exists(key).await
    }

    /// Atomically add one to the counter at `key` and return the new value.
    pub async fn increment(&self, key: &str) -> Result<i64, CacheError> {
        validate_key(key)?;
        if let Some(result) = self
            .try_remote("increment", key, |remote| async move {
                remote.increment(key).await
            })
            .await
        {
            return result;
        }
        self.inner.fallback.increment(key).await
    }

    /// Overwrite the deadline of an existing key.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        validate_key(key)?;
        validate_ttl(ttl)?;
        if let Some(result) = self
            .try_remote("expire", key, |remote| async move {
                remote.expire(key, ttl).await
            })
            .await
        {
            return result;
        }
        self.inner.fallback.expire(key, ttl).await
    }

    /// Remaining lifetime of the key, `None` if missing or without deadline.
    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        validate_key(key)?;
        if let Some(result) = self
            .try_remote("ttl", key, |remote| async move { remote.ttl(key).await })
            .await
        {
            return result;
        }
        self.inner.fallback.ttl(key).await
    }

    /// The remote handle, if the client is connected.
    async fn connected_remote(&self) -> Option<Arc<dyn Store>> {
        if self.state() != ConnectionState::Connected {
            return None;
        }
        self.inner.remote.read().await.clone()
    }

    /// Run `call` against the remote store.
    ///
    /// Returns `None` when the caller must use the fallback store: either the client is
    /// not connected, or the remote call failed and the client just degraded.
    async fn try_remote<T, F, Fut>(
        &self,
        op: &'static str,
        key: &str,
        call: F,
    ) -> Option<Result<T, CacheError>>
    where
        F: FnOnce(Arc<dyn Store>) -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
    {
        let remote = self.connected_remote().await?;
        let after = self.inner.config.operation_timeout;

        let error = match tokio::time::timeout(after, call(remote)).await {
            Ok(Ok(value)) => return Some(Ok(value)),
            Ok(Err(e)) if e.is_input_error() => return Some(Err(e)),
            Ok(Err(e)) => e,
            Err(_) => CacheError::Timeout {
                op,
                key: key.to_string(),
                after_ms: after.as_millis() as u64,
            },
        };

        self.degrade(op, key, &error);
        None
    }

    fn degrade(&self, op: &'static str, key: &str, error: &CacheError) {
        self.inner.state.sink().emit(CacheEvent::RemoteFailure {
            op,
            key: key.to_string(),
            error: error.to_string(),
        });

        if self
            .inner
            .state
            .transition(ConnectionState::Connected, ConnectionState::Degraded)
        {
            tracing::warn!(op, key = %key, error = %error, "remote cache degraded");
            self.spawn_recovery();
        }
    }

    /// Publish a fresh remote handle and move `from -> Connected`.
    async fn install(&self, store: Arc<dyn Store>, from: ConnectionState, generation: u64) -> bool {
        let mut remote = self.inner.remote.write().await;
        if self.inner.generation.load(Ordering::Acquire) != generation {
            return false;
        }

        *remote = Some(store);
        if self.inner.state.transition(from, ConnectionState::Connected) {
            return true;
        }
        *remote = None;
        false
    }

    fn spawn_recovery(&self) {
        let Some(interval) = self.inner.config.reconnect_interval else {
            return;
        };

        let generation = self.inner.generation.load(Ordering::Acquire);
        if self
            .inner
            .recovery_owner
            .compare_exchange(0, generation + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let client = self.clone();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                if client.inner.generation.load(Ordering::Acquire) != generation
                    || client.state() != ConnectionState::Degraded
                {
                    client.release_recovery(generation);
                    return;
                }

                if client.try_recover(generation).await {
                    return;
                }
            }
        });
    }

    /// Free the recovery slot if the task of `generation` still holds it.
    fn release_recovery(&self, generation: u64) {
        let _ = self.inner.recovery_owner.compare_exchange(
            generation + 1,
            0,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// One recovery tick. Returns `true` once the loop should stop.
    ///
    /// The recovery slot is released before the client becomes `Connected`, so a
    /// failure right after recovery can start a new loop.
    async fn try_recover(&self, generation: u64) -> bool {
        let timeout = self.inner.config.connect_timeout;

        let existing = self.inner.remote.read().await.clone();
        if let Some(store) = existing
            && matches!(tokio::time::timeout(timeout, store.ping()).await, Ok(Ok(())))
        {
            self.release_recovery(generation);
            if self
                .inner
                .state
                .transition(ConnectionState::Degraded, ConnectionState::Connected)
            {
                tracing::info!("remote cache heartbeat succeeded, leaving degraded mode");
            }
            return true;
        }

        let Some(connector) = self.inner.connector.clone() else {
            self.release_recovery(generation);
            return true;
        };

        match tokio::time::timeout(timeout, connector.connect()).await {
            Ok(Ok(store)) => {
                self.release_recovery(generation);
                if self
                    .install(store, ConnectionState::Degraded, generation)
                    .await
                {
                    tracing::info!("reconnected to remote cache, leaving degraded mode");
                }
                true
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "remote cache still unreachable");
                false
            }
            Err(_) => {
                tracing::debug!("remote cache handshake timed out");
                false
            }
        }
    }
}
