use std::time::Duration;
use tokio::time::Instant;

use crate::error::CacheError;

/// A value held by the fallback store together with its deadline.
///
/// Values are opaque bytes. Counters are stored the way the remote cache stores them:
/// as ASCII decimal integers, so a counter read back with `get` looks identical on both
/// stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// The cached bytes.
    pub value: Vec<u8>,

    /// After this instant the entry is treated as absent. `None` never expires.
    pub expires_at: Option<Instant>,
}

impl CacheEntry {
    /// Create an entry that expires `ttl` from now.
    pub fn new(value: Vec<u8>, ttl: Duration) -> Self {
        CacheEntry {
            value,
            expires_at: Some(Instant::now() + ttl),
        }
    }

    /// Create an entry without a deadline.
    pub fn persistent(value: Vec<u8>) -> Self {
        CacheEntry {
            value,
            expires_at: None,
        }
    }

    /// Check if the entry has expired and should not be used.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Remaining lifetime, `None` for entries without a deadline.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Parse the value as a counter.
    pub fn as_counter(&self, key: &str) -> Result<i64, CacheError> {
        std::str::from_utf8(&self.value)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| CacheError::NotAnInteger {
                key: key.to_string(),
            })
    }

    /// Add one to the counter, keeping the deadline.
    pub fn increment(&mut self, key: &str) -> Result<i64, CacheError> {
        let next = self
            .as_counter(key)?
            .checked_add(1)
            .ok_or_else(|| CacheError::NotAnInteger {
                key: key.to_string(),
            })?;
        self.value = next.to_string().into_bytes();
        Ok(next)
    }
}
