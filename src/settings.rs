//! Typed configuration for the cache layer.
//!
//! Every section deserializes with per-field defaults, so a partial config file is
//! enough. [`Settings::from_env`] reads the same values from environment variables;
//! malformed values are logged and replaced by their default. A zero timeout, TTL or
//! window counts as malformed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::client::ClientConfig;
use crate::error::CacheError;
use crate::rate_limit::RateLimitPolicy;
use crate::stores::memory::{FallbackStoreConfig, SweepConfig};

/// All settings consumed by the cache layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub remote: RemoteSettings,
    pub fallback: FallbackSettings,
    pub rate_limits: RateLimitSettings,
    pub read_through: ReadThroughSettings,
}

/// Remote cache connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Redis connection URL (e.g., "redis://localhost:6379").
    /// `None` runs the cache on the fallback store alone.
    #[serde(default)]
    pub url: Option<String>,

    /// Per-operation timeout in milliseconds
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// Handshake timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Handshake attempts before degrading
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Background recovery interval in milliseconds, 0 disables it
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// TTL for `set` calls that do not give one
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

fn default_operation_timeout_ms() -> u64 {
    500
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

fn default_connect_attempts() -> u32 {
    3
}

fn default_reconnect_interval_ms() -> u64 {
    5000
}

fn default_ttl_secs() -> u64 {
    3600
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            url: None,
            operation_timeout_ms: default_operation_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            connect_attempts: default_connect_attempts(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

impl RemoteSettings {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            operation_timeout: Duration::from_millis(positive_or(
                self.operation_timeout_ms,
                default_operation_timeout_ms(),
            )),
            connect_timeout: Duration::from_millis(positive_or(
                self.connect_timeout_ms,
                default_connect_timeout_ms(),
            )),
            max_connect_attempts: self.connect_attempts,
            default_ttl: Duration::from_secs(positive_or(
                self.default_ttl_secs,
                default_ttl_secs(),
            )),
            reconnect_interval: (self.reconnect_interval_ms > 0)
                .then(|| Duration::from_millis(self.reconnect_interval_ms)),
            ..ClientConfig::default()
        }
    }
}

/// Fallback store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSettings {
    /// Entry ceiling enforced by the sweep. `None` disables the sweep.
    pub max_items: Option<usize>,

    /// Share of `set` calls that run the sweep.
    pub sweep_frequency: f64,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            max_items: Some(100_000),
            sweep_frequency: 0.01,
        }
    }
}

impl FallbackSettings {
    pub fn store_config(&self) -> FallbackStoreConfig {
        FallbackStoreConfig {
            sweep: self.max_items.map(|max_items| SweepConfig {
                frequency: self.sweep_frequency,
                max_items,
            }),
        }
    }
}

/// The rate limit policy classes the service applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyClass {
    General,
    Auth,
    Upload,
    Search,
}

impl PolicyClass {
    pub const ALL: [PolicyClass; 4] = [
        PolicyClass::General,
        PolicyClass::Auth,
        PolicyClass::Upload,
        PolicyClass::Search,
    ];

    /// Counter scope, part of every counter key.
    pub fn scope(self) -> &'static str {
        match self {
            PolicyClass::General => "general",
            PolicyClass::Auth => "auth",
            PolicyClass::Upload => "upload",
            PolicyClass::Search => "search",
        }
    }

    fn env_prefix(self) -> &'static str {
        match self {
            PolicyClass::General => "RATE_LIMIT_GENERAL",
            PolicyClass::Auth => "RATE_LIMIT_AUTH",
            PolicyClass::Upload => "RATE_LIMIT_UPLOAD",
            PolicyClass::Search => "RATE_LIMIT_SEARCH",
        }
    }
}

/// Window and quota of one policy class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySettings {
    pub window_secs: u64,
    pub max_requests: u64,

    /// Per-role quota overrides, e.g. `{"admin": 1000}`.
    #[serde(default)]
    pub role_limits: HashMap<String, u64>,
}

impl PolicySettings {
    fn new(window_secs: u64, max_requests: u64) -> Self {
        Self {
            window_secs,
            max_requests,
            role_limits: HashMap::new(),
        }
    }
}

/// Rate limiting settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub general: PolicySettings,
    pub auth: PolicySettings,
    pub upload: PolicySettings,
    pub search: PolicySettings,

    /// Identifiers that are never counted.
    pub allow_list: Vec<String>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            general: PolicySettings::new(15 * 60, 100),
            auth: PolicySettings::new(15 * 60, 5),
            upload: PolicySettings::new(60 * 60, 30),
            search: PolicySettings::new(60, 30),
            allow_list: Vec::new(),
        }
    }
}

impl RateLimitSettings {
    pub fn class(&self, class: PolicyClass) -> &PolicySettings {
        match class {
            PolicyClass::General => &self.general,
            PolicyClass::Auth => &self.auth,
            PolicyClass::Upload => &self.upload,
            PolicyClass::Search => &self.search,
        }
    }

    fn class_mut(&mut self, class: PolicyClass) -> &mut PolicySettings {
        match class {
            PolicyClass::General => &mut self.general,
            PolicyClass::Auth => &mut self.auth,
            PolicyClass::Upload => &mut self.upload,
            PolicyClass::Search => &mut self.search,
        }
    }

    /// Build the policy for a class, including its role overrides.
    pub fn policy(&self, class: PolicyClass) -> Result<RateLimitPolicy, CacheError> {
        let settings = self.class(class);
        let policy = RateLimitPolicy::new(
            class.scope(),
            Duration::from_secs(settings.window_secs),
            settings.max_requests,
        )?;

        if settings.role_limits.is_empty() {
            return Ok(policy);
        }
        Ok(policy.with_role_limits(settings.role_limits.clone()))
    }
}

/// TTLs for read-through caching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadThroughSettings {
    /// Single-item reads.
    pub item_ttl_secs: u64,

    /// Aggregates and statistics: costlier to compute, tolerate more staleness.
    pub aggregate_ttl_secs: u64,
}

impl Default for ReadThroughSettings {
    fn default() -> Self {
        Self {
            item_ttl_secs: 300,
            aggregate_ttl_secs: 3600,
        }
    }
}

impl ReadThroughSettings {
    pub fn item_ttl(&self) -> Duration {
        Duration::from_secs(positive_or(
            self.item_ttl_secs,
            ReadThroughSettings::default().item_ttl_secs,
        ))
    }

    pub fn aggregate_ttl(&self) -> Duration {
        Duration::from_secs(positive_or(
            self.aggregate_ttl_secs,
            ReadThroughSettings::default().aggregate_ttl_secs,
        ))
    }
}

impl Settings {
    /// Load settings from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        let remote = &mut settings.remote;
        remote.url = lookup("CACHE_REDIS_URL").filter(|url| !url.trim().is_empty());
        remote.operation_timeout_ms = parse_positive_or(
            &lookup,
            "CACHE_OPERATION_TIMEOUT_MS",
            remote.operation_timeout_ms,
        );
        remote.connect_timeout_ms =
            parse_positive_or(&lookup, "CACHE_CONNECT_TIMEOUT_MS", remote.connect_timeout_ms);
        remote.connect_attempts =
            parse_or(&lookup, "CACHE_CONNECT_ATTEMPTS", remote.connect_attempts);
        remote.reconnect_interval_ms = parse_or(
            &lookup,
            "CACHE_RECONNECT_INTERVAL_MS",
            remote.reconnect_interval_ms,
        );
        remote.default_ttl_secs =
            parse_positive_or(&lookup, "CACHE_DEFAULT_TTL_SECS", remote.default_ttl_secs);

        if let Some(raw) = lookup("CACHE_FALLBACK_MAX_ITEMS") {
            settings.fallback.max_items = match raw.trim() {
                "" | "0" | "none" => None,
                value => parse_value("CACHE_FALLBACK_MAX_ITEMS", value)
                    .or(settings.fallback.max_items),
            };
        }

        for class in PolicyClass::ALL {
            let prefix = class.env_prefix();
            let policy = settings.rate_limits.class_mut(class);
            policy.window_secs = parse_positive_or(
                &lookup,
                &format!("{prefix}_WINDOW_SECS"),
                policy.window_secs,
            );
            policy.max_requests = parse_or(
                &lookup,
                &format!("{prefix}_MAX_REQUESTS"),
                policy.max_requests,
            );
            if let Some(raw) = lookup(&format!("{prefix}_ROLE_LIMITS")) {
                policy.role_limits = parse_role_limits(&raw);
            }
        }

        if let Some(raw) = lookup("RATE_LIMIT_ALLOWLIST") {
            settings.rate_limits.allow_list = raw
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(String::from)
                .collect();
        }

        let read_through = &mut settings.read_through;
        read_through.item_ttl_secs =
            parse_positive_or(&lookup, "CACHE_ITEM_TTL_SECS", read_through.item_ttl_secs);
        read_through.aggregate_ttl_secs = parse_positive_or(
            &lookup,
            "CACHE_AGGREGATE_TTL_SECS",
            read_through.aggregate_ttl_secs,
        );

        settings
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Option<T> {
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring malformed setting");
            None
        }
    }
}

fn parse_or<T, F>(lookup: &F, name: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|raw| parse_value(name, &raw))
        .unwrap_or(default)
}

/// Like [`parse_or`] for durations, where zero is rejected as malformed.
fn parse_positive_or<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name).and_then(|raw| parse_value::<u64>(name, &raw)) {
        Some(0) => {
            tracing::warn!(var = name, default, "ignoring zero setting");
            default
        }
        Some(value) => value,
        None => default,
    }
}

fn positive_or(value: u64, default: u64) -> u64 {
    if value == 0 { default } else { value }
}

/// Parse `role=limit` pairs separated by commas. Malformed pairs are skipped.
fn parse_role_limits(raw: &str) -> HashMap<String, u64> {
    raw.split(',')
        .filter_map(|pair| {
            let (role, limit) = pair.split_once('=')?;
            let role = role.trim();
            if role.is_empty() {
                return None;
            }
            let limit = parse_value("role limit", limit)?;
            Some((role.to_string(), limit))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let settings = Settings::from_lookup(|_| None);

        assert_eq!(settings, Settings::default());
        assert!(settings.remote.url.is_none());
        assert_eq!(settings.rate_limits.general.window_secs, 900);
        assert_eq!(settings.rate_limits.general.max_requests, 100);
        assert_eq!(settings.rate_limits.auth.max_requests, 5);
        assert_eq!(settings.read_through.item_ttl(), Duration::from_secs(300));
        assert_eq!(
            settings.read_through.aggregate_ttl(),
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn test_environment_overrides() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("CACHE_REDIS_URL", "redis://cache:6379"),
            ("CACHE_OPERATION_TIMEOUT_MS", "150"),
            ("CACHE_RECONNECT_INTERVAL_MS", "0"),
            ("CACHE_FALLBACK_MAX_ITEMS", "none"),
            ("RATE_LIMIT_AUTH_WINDOW_SECS", "60"),
            ("RATE_LIMIT_AUTH_MAX_REQUESTS", "3"),
            ("RATE_LIMIT_GENERAL_ROLE_LIMITS", "admin=1000, moderator=300, broken"),
            ("RATE_LIMIT_ALLOWLIST", "127.0.0.1, ,10.0.0.5"),
        ]));

        assert_eq!(settings.remote.url.as_deref(), Some("redis://cache:6379"));
        let config = settings.remote.client_config();
        assert_eq!(config.operation_timeout, Duration::from_millis(150));
        assert!(config.reconnect_interval.is_none());
        assert!(settings.fallback.store_config().sweep.is_none());

        assert_eq!(settings.rate_limits.auth.window_secs, 60);
        assert_eq!(settings.rate_limits.auth.max_requests, 3);
        assert_eq!(settings.rate_limits.general.role_limits.len(), 2);
        assert_eq!(settings.rate_limits.general.role_limits["admin"], 1000);
        assert_eq!(
            settings.rate_limits.allow_list,
            vec!["127.0.0.1".to_string(), "10.0.0.5".to_string()]
        );
    }

    #[test]
    fn test_malformed_values_fall_back_to_defaults() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("CACHE_CONNECT_ATTEMPTS", "three"),
            ("RATE_LIMIT_SEARCH_MAX_REQUESTS", "-1"),
            ("CACHE_REDIS_URL", "   "),
        ]));

        assert_eq!(settings.remote.connect_attempts, 3);
        assert_eq!(settings.rate_limits.search.max_requests, 30);
        assert!(settings.remote.url.is_none());
    }

    #[test]
    fn test_zero_durations_fall_back_to_defaults() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("CACHE_DEFAULT_TTL_SECS", "0"),
            ("CACHE_ITEM_TTL_SECS", "0"),
            ("CACHE_AGGREGATE_TTL_SECS", "0"),
            ("CACHE_OPERATION_TIMEOUT_MS", "0"),
            ("CACHE_CONNECT_TIMEOUT_MS", "0"),
            ("RATE_LIMIT_AUTH_WINDOW_SECS", "0"),
            ("CACHE_RECONNECT_INTERVAL_MS", "0"),
        ]));
        let defaults = Settings::default();

        assert_eq!(settings.remote.default_ttl_secs, defaults.remote.default_ttl_secs);
        assert_eq!(
            settings.remote.operation_timeout_ms,
            defaults.remote.operation_timeout_ms
        );
        assert_eq!(
            settings.remote.connect_timeout_ms,
            defaults.remote.connect_timeout_ms
        );
        assert_eq!(settings.read_through, defaults.read_through);
        assert!(settings.rate_limits.policy(PolicyClass::Auth).is_ok());

        // Zero still disables background recovery.
        assert!(settings.remote.client_config().reconnect_interval.is_none());

        // Zeros that arrive through a config document are replaced when used.
        let parsed: Settings = serde_json::from_str(
            r#"{"remote": {"default_ttl_secs": 0, "operation_timeout_ms": 0},
                "read_through": {"item_ttl_secs": 0}}"#,
        )
        .unwrap();
        let config = parsed.remote.client_config();
        assert_eq!(config.default_ttl, Duration::from_secs(3600));
        assert_eq!(config.operation_timeout, Duration::from_millis(500));
        assert_eq!(parsed.read_through.item_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_document_uses_field_defaults() {
        let settings: Settings = serde_json::from_str(
            r#"{
                "remote": { "url": "redis://localhost:6379" },
                "rate_limits": { "search": { "window_secs": 10, "max_requests": 2 } }
            }"#,
        )
        .unwrap();

        assert_eq!(settings.remote.operation_timeout_ms, 500);
        assert_eq!(settings.rate_limits.search.max_requests, 2);
        assert_eq!(settings.rate_limits.general.max_requests, 100);
        assert_eq!(settings.read_through.item_ttl_secs, 300);
    }

    #[test]
    fn test_policy_for_class() {
        let mut settings = RateLimitSettings::default();
        settings.auth.role_limits.insert("admin".to_string(), 50);

        let policy = settings.policy(PolicyClass::Auth).unwrap();
        assert_eq!(policy.scope(), "auth");
        assert_eq!(policy.window(), Duration::from_secs(900));
        assert_eq!(policy.max_requests(), 5);

        settings.search.window_secs = 0;
        assert!(settings.policy(PolicyClass::Search).is_err());
    }
}
