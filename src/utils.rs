//! Shared utilities for the cache library.

use std::fmt::{Display, Write as _};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::CacheError;

/// Longest key accepted by the cache, in bytes.
pub const MAX_KEY_LEN: usize = 512;

/// Build a composite cache key from a prefix and a key.
///
/// Format: `{prefix}:{key}`
pub fn build_cache_key<N: Display>(prefix: &N, key: &str) -> String {
    format!("{}:{}", prefix, key)
}

/// Reject keys the remote cache and the fallback store would disagree on.
pub fn validate_key(key: &str) -> Result<(), CacheError> {
    let reason = if key.is_empty() {
        "key is empty"
    } else if key.len() > MAX_KEY_LEN {
        "key is longer than 512 bytes"
    } else if key.chars().any(|c| c.is_control() || c.is_whitespace()) {
        "key contains whitespace or control characters"
    } else {
        return Ok(());
    };

    Err(CacheError::InvalidKey {
        key: key.to_string(),
        reason,
    })
}

pub fn validate_ttl(ttl: Duration) -> Result<(), CacheError> {
    if ttl.is_zero() {
        return Err(CacheError::InvalidTtl);
    }
    Ok(())
}

/// Percent-encode the characters keys may not contain (and `%` itself), so that any
/// string maps to a distinct valid key fragment.
pub fn escape_key_fragment(fragment: &str) -> String {
    let mut escaped = String::with_capacity(fragment.len());
    for c in fragment.chars() {
        if c == '%' || c.is_whitespace() || c.is_control() {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                let _ = write!(escaped, "%{:02X}", byte);
            }
        } else {
            escaped.push(c);
        }
    }
    escaped
}

/// Whole seconds, rounded up.
pub fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 { secs + 1 } else { secs }
}

/// Simple pseudo-random number generator (0.0 to 1.0).
/// This avoids adding a dependency on rand crate.
pub fn rand_simple() -> f64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();

    let state = RandomState::new();
    let mut hasher = state.build_hasher();
    hasher.write_u64(nanos);
    (hasher.finish() as f64) / (u64::MAX as f64)
}
