use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::store::Store;

use crate::utils::rand_simple;

/// Configuration for the sweep that runs on set operations.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Provide a number between 0 and 1 to calculate whether the sweep should run on each set.
    ///
    /// - `1.0` -> sweep on every `set`
    /// - `0.5` -> sweep on every 2nd `set` (on average)
    /// - `0.0` -> disable the sweep
    pub frequency: f64,

    /// Remove items until the number of items in the map is at most `max_items`.
    pub max_items: usize,
}

/// Configuration for FallbackStore.
#[derive(Debug, Clone, Default)]
pub struct FallbackStoreConfig {
    /// Remove expired entries (and, above `max_items`, the soonest to expire) on `set`.
    pub sweep: Option<SweepConfig>,
}

/// Thread-safe in-process store using a HashMap behind an RwLock.
///
/// Serves every operation while the remote cache is unreachable. Expired entries are
/// evicted lazily on access; the optional sweep bounds memory for keys that are never
/// read again. Counters are updated under the write lock, so concurrent increments
/// never lose an update.
///
/// The store is local to the process: two service instances never see each other's
/// entries.
pub struct FallbackStore {
    state: RwLock<HashMap<String, CacheEntry>>,
    sweep: Option<SweepConfig>,
}

impl Default for FallbackStore {
    fn default() -> Self {
        FallbackStore::new(FallbackStoreConfig::default())
    }
}

impl FallbackStore {
    /// Create a new FallbackStore with the given configuration.
    pub fn new(config: FallbackStoreConfig) -> Self {
        FallbackStore {
            state: RwLock::new(HashMap::new()),
            sweep: config.sweep,
        }
    }

    /// Number of entries held, including expired ones not yet evicted.
    pub async fn len(&self) -> usize {
        self.state.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Read a live entry, evicting it if it has expired.
    async fn live_entry(&self, key: &str) -> Option<CacheEntry> {
        let now = Instant::now();
        {
            let state = self.state.read().await;
            match state.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.clone()),
                Some(_) => {}
            }
        }

        // Re-check under the write lock: a concurrent set may have replaced the entry.
        let mut state = self.state.write().await;
        if state.get(key).is_some_and(|entry| entry.is_expired(now)) {
            state.remove(key);
        }
        None
    }

    /// Run the sweep if configured and the random check passes.
    async fn maybe_sweep(&self) {
        let Some(ref config) = self.sweep else {
            return;
        };

        // Check frequency
        if config.frequency <= 0.0 {
            return;
        }

        let should_sweep = if config.frequency >= 1.0 {
            true
        } else {
            rand_simple() < config.frequency
        };

        if !should_sweep {
            return;
        }

        let mut state = self.state.write().await;
        let now = Instant::now();

        // First delete all expired entries
        state.retain(|_, entry| !entry.is_expired(now));

        // If still over max_items, remove the entries closest to expiry
        if state.len() > config.max_items {
            let mut entries: Vec<_> = state
                .iter()
                .map(|(k, entry)| (k.clone(), entry.expires_at))
                .collect();
            // Entries without a deadline sort last.
            entries.sort_by_key(|(_, expires_at)| (expires_at.is_none(), *expires_at));

            let to_remove = state.len() - config.max_items;
            for (key, _) in entries.into_iter().take(to_remove) {
                state.remove(&key);
            }
        }
    }
}

#[async_trait]
impl Store for FallbackStore {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.live_entry(key).await.map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        {
            let mut state = self.state.write().await;
            state.insert(key.to_string(), CacheEntry::new(value.to_vec(), ttl));
        }

        self.maybe_sweep().await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.state.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        let state = self.state.read().await;
        Ok(state.get(key).is_some_and(|entry| !entry.is_expired(now)))
    }

    async fn increment(&self, key: &str) -> Result<i64, CacheError> {
        let now = Instant::now();
        let mut state = self.state.write().await;

        match state.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => entry.increment(key),
            _ => {
                // Absent or expired: a fresh counter with no deadline.
                state.insert(key.to_string(), CacheEntry::persistent(b"1".to_vec()));
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut state = self.state.write().await;

        if let Some(entry) = state.get_mut(key)
            && !entry.is_expired(now)
        {
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let now = Instant::now();
        let state = self.state.read().await;
        Ok(state
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| entry.remaining(now)))
    }
}
