use futures::future::join_all;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::client::CacheClient;
use crate::error::CacheError;
use crate::utils::{build_cache_key, escape_key_fragment, validate_key, validate_ttl};

/// Derive a cache key from a logical query.
///
/// The parameters are serialized to canonical JSON (object fields sorted), so equal
/// queries map to the same key however they were built, and different queries never
/// share one.
///
/// # Example
/// ```ignore
/// let key = derive_key("posts:list", &json!({ "page": 2, "limit": 20 }))?;
/// assert_eq!(key, r#"posts:list:{"limit":20,"page":2}"#);
/// ```
pub fn derive_key<P: Serialize + ?Sized>(namespace: &str, params: &P) -> Result<String, CacheError> {
    let canonical = serde_json::to_value(params)?.to_string();
    let key = build_cache_key(&namespace, &escape_key_fragment(&canonical));
    validate_key(&key)?;
    Ok(key)
}

/// Keys written through a [`ReadThroughCache`], with the instant their TTL runs out.
///
/// Expired keys are pruned on every write, so the index never outgrows the set of keys
/// that can still be cached.
#[derive(Debug, Default)]
struct KeyIndex {
    deadlines: BTreeMap<String, Instant>,
    by_deadline: BTreeSet<(Instant, String)>,
}

impl KeyIndex {
    fn insert(&mut self, key: &str, deadline: Instant) {
        self.remove(key);
        self.deadlines.insert(key.to_string(), deadline);
        self.by_deadline.insert((deadline, key.to_string()));
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.deadlines.remove(key) {
            Some(deadline) => {
                self.by_deadline.remove(&(deadline, key.to_string()));
                true
            }
            None => false,
        }
    }

    fn prune(&mut self, now: Instant) {
        while self
            .by_deadline
            .first()
            .is_some_and(|(deadline, _)| *deadline <= now)
        {
            if let Some((_, key)) = self.by_deadline.pop_first() {
                self.deadlines.remove(&key);
            }
        }
    }

    fn take_prefix(&mut self, prefix: &str) -> Vec<String> {
        let matched: Vec<String> = self
            .deadlines
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        for key in &matched {
            self.remove(key);
        }
        matched
    }

    fn len(&self) -> usize {
        self.deadlines.len()
    }
}

/// Cache-aside wrapper for expensive reads.
///
/// On a hit the cached value is returned; on a miss the value is computed, stored with
/// the given TTL and returned. Values are stored as JSON.
///
/// Keys written through this instance are remembered in a local ordered index so
/// [`invalidate_prefix`](Self::invalidate_prefix) can delete them. Keys written by other
/// processes are unknown here and only go away with their TTL. Entries leave the index
/// once their TTL has passed.
#[derive(Clone)]
pub struct ReadThroughCache {
    client: CacheClient,
    index: Arc<Mutex<KeyIndex>>,
}

impl ReadThroughCache {
    pub fn new(client: CacheClient) -> Self {
        ReadThroughCache {
            client,
            index: Arc::new(Mutex::new(KeyIndex::default())),
        }
    }

    pub fn client(&self) -> &CacheClient {
        &self.client
    }

    /// Number of unexpired keys remembered for prefix invalidation.
    pub async fn indexed_keys(&self) -> usize {
        let mut index = self.index.lock().await;
        index.prune(Instant::now());
        index.len()
    }

    /// Return the cached value or compute, store and return it.
    ///
    /// Errors of `compute` are returned unchanged and nothing is stored. A cached value
    /// that does not decode as `V` is dropped and recomputed.
    ///
    /// # Example
    /// ```ignore
    /// let stats: Stats = cache
    ///     .get_or_compute("stats:global", settings.aggregate_ttl(), || async {
    ///         db.compute_stats().await
    ///     })
    ///     .await?;
    /// ```
    pub async fn get_or_compute<V, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<V, E>
    where
        V: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        validate_ttl(ttl)?;

        if let Some(bytes) = self.client.get(key).await? {
            match serde_json::from_slice::<V>(&bytes) {
                Ok(value) => {
                    tracing::debug!(key = %key, "read-through hit");
                    return Ok(value);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "dropping undecodable cached value");
                    self.client.delete(key).await?;
                }
            }
        } else {
            tracing::debug!(key = %key, "read-through miss");
            self.index.lock().await.remove(key);
        }

        let value = compute().await?;

        match serde_json::to_vec(&value) {
            Ok(bytes) => {
                self.client.set(key, &bytes, Some(ttl)).await?;
                let now = Instant::now();
                let mut index = self.index.lock().await;
                index.prune(now);
                index.insert(key, now + ttl);
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "computed value is not cacheable");
            }
        }

        Ok(value)
    }

    /// Drop the cached value after a write changed the data behind it.
    pub async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        self.client.delete(key).await?;
        self.index.lock().await.remove(key);
        Ok(())
    }

    /// Drop every key written through this cache that starts with `prefix`.
    ///
    /// Returns the number of keys deleted.
    pub async fn invalidate_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        validate_key(prefix)?;

        let keys = {
            let mut index = self.index.lock().await;
            index.prune(Instant::now());
            index.take_prefix(prefix)
        };

        let results = join_all(keys.iter().map(|key| self.client.delete(key))).await;
        for result in results {
            result?;
        }

        tracing::debug!(prefix = %prefix, count = keys.len(), "invalidated cached keys");
        Ok(keys.len())
    }
}
