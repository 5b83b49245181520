//! Fixed-window admission control on top of the [`CacheClient`].
//!
//! Each `(scope, identifier)` pair owns a counter key `rl:<scope>:<identifier>`. The
//! first request of a window creates the counter and sets its TTL to the window
//! length; when the TTL runs out the next request starts a new window. Identifiers whose
//! escaped form would not fit in a key are replaced by their SHA-256 digest.
//!
//! Windows are fixed, not sliding: a caller can send `max_requests` at the end of one
//! window and `max_requests` again at the start of the next. A sliding log or token
//! bucket could be built on the same primitives without changing [`RateLimiter::check`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::client::CacheClient;
use crate::error::CacheError;
use crate::utils::{MAX_KEY_LEN, build_cache_key, ceil_secs, escape_key_fragment, validate_key};

/// Longest accepted scope. Keeps digest counter keys far below [`MAX_KEY_LEN`].
const MAX_SCOPE_LEN: usize = 128;

/// Maps a caller to an overridden quota. `None` keeps the policy default.
pub type LimitResolver = Arc<dyn Fn(&Caller) -> Option<u64> + Send + Sync>;

/// Who is asking for admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Stable identity: client IP, user id, API key id...
    pub identifier: String,
    /// Authenticated role, if any.
    pub role: Option<String>,
}

impl Caller {
    pub fn new(identifier: impl Into<String>) -> Self {
        Caller {
            identifier: identifier.into(),
            role: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// Window and quota for one class of operations.
#[derive(Clone)]
pub struct RateLimitPolicy {
    scope: String,
    window: Duration,
    max_requests: u64,
    resolver: Option<LimitResolver>,
}

impl fmt::Debug for RateLimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitPolicy")
            .field("scope", &self.scope)
            .field("window", &self.window)
            .field("max_requests", &self.max_requests)
            .field("dynamic", &self.resolver.is_some())
            .finish()
    }
}

impl RateLimitPolicy {
    /// Create a policy allowing `max_requests` per `window` for each identifier.
    ///
    /// The scope becomes part of the counter keys, so it must be a valid key fragment of
    /// at most 128 bytes.
    pub fn new(
        scope: impl Into<String>,
        window: Duration,
        max_requests: u64,
    ) -> Result<Self, CacheError> {
        let scope = scope.into();
        if let Err(e) = validate_key(&scope) {
            return Err(CacheError::InvalidPolicy(e.to_string()));
        }
        if scope.len() > MAX_SCOPE_LEN {
            return Err(CacheError::InvalidPolicy(format!(
                "scope is {} bytes, at most {} allowed",
                scope.len(),
                MAX_SCOPE_LEN
            )));
        }
        if window.is_zero() {
            return Err(CacheError::InvalidPolicy(format!(
                "window of scope '{}' must be greater than zero",
                scope
            )));
        }

        Ok(RateLimitPolicy {
            scope,
            window,
            max_requests,
            resolver: None,
        })
    }

    /// Resolve the quota per caller.
    pub fn with_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&Caller) -> Option<u64> + Send + Sync + 'static,
    {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Override the quota for callers with the given roles.
    pub fn with_role_limits(self, limits: HashMap<String, u64>) -> Self {
        self.with_resolver(move |caller| {
            caller
                .role
                .as_deref()
                .and_then(|role| limits.get(role).copied())
        })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Default quota, before per-caller overrides.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Effective quota for the caller.
    pub fn limit_for(&self, caller: &Caller) -> u64 {
        self.resolver
            .as_ref()
            .and_then(|resolve| resolve(caller))
            .unwrap_or(self.max_requests)
    }

    /// Counter key for an identifier.
    ///
    /// Always a valid key. When the escaped identifier would push the key past
    /// [`MAX_KEY_LEN`] the fragment becomes `%%<sha256 hex>`; escaped fragments never
    /// contain `%%`, so the two forms cannot collide.
    pub fn counter_key(&self, identifier: &str) -> String {
        let prefix = format!("rl:{}", self.scope);
        let key = build_cache_key(&prefix, &escape_key_fragment(identifier));
        if key.len() <= MAX_KEY_LEN {
            return key;
        }

        let digest = hex::encode(Sha256::digest(identifier.as_bytes()));
        build_cache_key(&prefix, &format!("%%{}", digest))
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Seconds until the window resets. Zero when allowed.
    pub retry_after_secs: u64,
    /// Quota that applied to the caller.
    pub limit: u64,
    /// Requests left in the current window.
    pub remaining: u64,
}

impl RateLimitDecision {
    fn allowed(limit: u64, remaining: u64) -> Self {
        RateLimitDecision {
            allowed: true,
            retry_after_secs: 0,
            limit,
            remaining,
        }
    }

    fn unlimited() -> Self {
        Self::allowed(u64::MAX, u64::MAX)
    }

    fn denied(limit: u64, retry_after_secs: u64) -> Self {
        RateLimitDecision {
            allowed: false,
            retry_after_secs,
            limit,
            remaining: 0,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

/// Fixed-window rate limiter.
///
/// Counting problems never turn into denials: if the counter cannot be read or
/// updated the request is allowed and the problem is logged.
#[derive(Clone)]
pub struct RateLimiter {
    client: CacheClient,
    allow_list: Arc<HashSet<String>>,
}

impl RateLimiter {
    pub fn new(client: CacheClient) -> Self {
        RateLimiter {
            client,
            allow_list: Arc::new(HashSet::new()),
        }
    }

    /// Identifiers that are always admitted and never counted.
    pub fn with_allow_list<I, S>(mut self, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_list = Arc::new(identifiers.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_allow_listed(&self, identifier: &str) -> bool {
        self.allow_list.contains(identifier)
    }

    /// May this identifier proceed under the policy?
    pub async fn check(&self, policy: &RateLimitPolicy, identifier: &str) -> RateLimitDecision {
        self.check_caller(policy, &Caller::new(identifier)).await
    }

    /// Like [`check`](Self::check), with role-based quota resolution.
    pub async fn check_caller(
        &self,
        policy: &RateLimitPolicy,
        caller: &Caller,
    ) -> RateLimitDecision {
        // Before counting, so allow-listed traffic never touches shared counters.
        if self.is_allow_listed(&caller.identifier) {
            return RateLimitDecision::unlimited();
        }

        let limit = policy.limit_for(caller);
        let key = policy.counter_key(&caller.identifier);

        let count = match self.client.increment(&key).await {
            Ok(count) => count.max(0) as u64,
            Err(e) => {
                tracing::warn!(
                    scope = policy.scope(),
                    key = %key,
                    error = %e,
                    "rate limit counter unavailable, allowing request"
                );
                return RateLimitDecision::allowed(limit, limit);
            }
        };

        if count == 1
            && let Err(e) = self.client.expire(&key, policy.window).await
        {
            tracing::warn!(key = %key, error = %e, "failed to start rate limit window");
        }

        if count <= limit {
            return RateLimitDecision::allowed(limit, limit - count);
        }

        let retry_after_secs = self.retry_after(&key, policy).await;
        tracing::debug!(
            scope = policy.scope(),
            key = %key,
            count,
            limit,
            retry_after_secs,
            "rate limit exceeded"
        );
        RateLimitDecision::denied(limit, retry_after_secs)
    }

    /// Seconds left in the caller's window, best effort.
    async fn retry_after(&self, key: &str, policy: &RateLimitPolicy) -> u64 {
        let window_secs = ceil_secs(policy.window).max(1);

        match self.client.ttl(key).await {
            Ok(Some(remaining)) if !remaining.is_zero() => ceil_secs(remaining).max(1),
            Ok(_) => {
                // A counter without deadline never resets; give it a window.
                if let Err(e) = self.client.expire(key, policy.window).await {
                    tracing::warn!(key = %key, error = %e, "failed to repair rate limit window");
                }
                window_secs
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to read rate limit window");
                window_secs
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(CacheClient::builder().build())
    }

    #[test]
    fn test_policy_validation() {
        assert!(RateLimitPolicy::new("auth", Duration::from_secs(60), 5).is_ok());
        assert!(matches!(
            RateLimitPolicy::new("auth", Duration::ZERO, 5),
            Err(CacheError::InvalidPolicy(_))
        ));
        assert!(matches!(
            RateLimitPolicy::new("bad scope", Duration::from_secs(60), 5),
            Err(CacheError::InvalidPolicy(_))
        ));
        assert!(matches!(
            RateLimitPolicy::new("s".repeat(MAX_SCOPE_LEN + 1), Duration::from_secs(60), 5),
            Err(CacheError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn test_counter_keys_are_distinct_and_valid() {
        let policy = RateLimitPolicy::new("auth", Duration::from_secs(60), 5).unwrap();

        assert_eq!(policy.counter_key("10.0.0.1"), "rl:auth:10.0.0.1");
        assert_eq!(policy.counter_key("a b"), "rl:auth:a%20b");
        assert_eq!(policy.counter_key("a%20b"), "rl:auth:a%2520b");
        assert!(validate_key(&policy.counter_key("tab\there")).is_ok());
    }

    #[test]
    fn test_oversized_identifiers_get_digest_keys() {
        let policy = RateLimitPolicy::new("auth", Duration::from_secs(900), 5).unwrap();

        let long = "x".repeat(600);
        let spaces = " ".repeat(200);
        let other_long = format!("{}y", "x".repeat(599));

        for identifier in [&long, &spaces, &other_long] {
            let key = policy.counter_key(identifier);
            assert!(key.len() <= MAX_KEY_LEN);
            assert!(key.starts_with("rl:auth:%%"));
            assert!(validate_key(&key).is_ok());
        }

        assert_ne!(policy.counter_key(&long), policy.counter_key(&other_long));
        assert_eq!(policy.counter_key(&long), policy.counter_key(&long));

        // Largest identifier that still fits keeps its readable form.
        let fits = "x".repeat(MAX_KEY_LEN - "rl:auth:".len());
        assert_eq!(policy.counter_key(&fits), format!("rl:auth:{}", fits));
    }

    #[tokio::test]
    async fn test_oversized_identifiers_are_limited() {
        let limiter = limiter();
        let policy = RateLimitPolicy::new("auth", Duration::from_secs(900), 5).unwrap();

        for identifier in ["x".repeat(600), " ".repeat(200)] {
            let mut allowed = 0;
            for _ in 0..50 {
                if limiter.check(&policy, &identifier).await.allowed {
                    allowed += 1;
                }
            }
            assert_eq!(allowed, 5);

            let decision = limiter.check(&policy, &identifier).await;
            assert!(!decision.allowed);
            assert!(decision.retry_after_secs > 0);
        }
    }

    #[test]
    fn test_role_limits_override_default() {
        let policy = RateLimitPolicy::new("general", Duration::from_secs(900), 100)
            .unwrap()
            .with_role_limits(HashMap::from([("admin".to_string(), 1000)]));

        assert_eq!(policy.limit_for(&Caller::new("u1")), 100);
        assert_eq!(policy.limit_for(&Caller::new("u1").with_role("user")), 100);
        assert_eq!(policy.limit_for(&Caller::new("u1").with_role("admin")), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window() {
        let limiter = limiter();
        let policy = RateLimitPolicy::new("login", Duration::from_secs(60), 5).unwrap();

        for call in 1..=5 {
            let decision = limiter.check(&policy, "10.0.0.1").await;
            assert!(decision.allowed, "call {call} should be allowed");
            assert_eq!(decision.remaining, 5 - call);
        }

        let denied = limiter.check(&policy, "10.0.0.1").await;
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_secs, 60);
        assert_eq!(denied.remaining, 0);

        tokio::time::advance(Duration::from_secs(60)).await;

        let decision = limiter.check(&policy, "10.0.0.1").await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_tracks_remaining_window() {
        let limiter = limiter();
        let policy = RateLimitPolicy::new("search", Duration::from_secs(60), 1).unwrap();

        assert!(limiter.check(&policy, "u1").await.allowed);
        tokio::time::advance(Duration::from_millis(30_500)).await;

        let denied = limiter.check(&policy, "u1").await;
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_secs, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_orphan_counter_gets_a_window() {
        let limiter = limiter();
        let policy = RateLimitPolicy::new("upload", Duration::from_secs(60), 2).unwrap();
        let key = policy.counter_key("u1");

        // A counter left without deadline, e.g. by a crash between INCR and EXPIRE.
        limiter.client.increment(&key).await.unwrap();
        limiter.client.increment(&key).await.unwrap();
        assert_eq!(limiter.client.ttl(&key).await.unwrap(), None);

        let denied = limiter.check(&policy, "u1").await;
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_secs, 60);
        assert_eq!(
            limiter.client.ttl(&key).await.unwrap(),
            Some(Duration::from_secs(60))
        );
    }

    #[tokio::test]
    async fn test_counting_errors_fail_open() {
        let limiter = limiter();
        let policy = RateLimitPolicy::new("general", Duration::from_secs(60), 1).unwrap();
        let key = policy.counter_key("u1");

        // A non-integer value under the counter key makes every increment fail.
        limiter.client.set(&key, b"garbage", None).await.unwrap();

        for _ in 0..3 {
            let decision = limiter.check(&policy, "u1").await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 1);
        }
    }

    #[tokio::test]
    async fn test_zero_quota_denies_everything() {
        let limiter = limiter();
        let policy = RateLimitPolicy::new("frozen", Duration::from_secs(60), 0).unwrap();

        let decision = limiter.check(&policy, "u1").await;
        assert!(!decision.allowed);
        assert!(decision.retry_after_secs > 0);
    }
}
