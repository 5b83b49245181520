//! resilient-cache - a key-value cache that degrades from a remote cache service to an
//! in-process store without changing its contract.
//!
//! This library provides:
//! - A [`CacheClient`] over a remote cache (Redis) with a local fallback store
//! - Bounded remote calls, connection retries and background recovery
//! - Fixed-window rate limiting ([`RateLimiter`]) that fails open
//! - Cache-aside reads with explicit invalidation ([`ReadThroughCache`])
//!
//! # Example
//!
//! ```ignore
//! use resilient_cache::{
//!     CacheClientBuilder, RateLimiter, ReadThroughCache, PolicyClass, Settings,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::from_env();
//!
//!     // One shared client, owned by the composition root.
//!     let client = CacheClientBuilder::from_settings(&settings)?.build();
//!     client.connect().await;
//!
//!     let limiter = RateLimiter::new(client.clone())
//!         .with_allow_list(settings.rate_limits.allow_list.clone());
//!     let auth = settings.rate_limits.policy(PolicyClass::Auth)?;
//!
//!     let decision = limiter.check(&auth, "10.0.0.1").await;
//!     if !decision.allowed {
//!         println!("retry in {}s", decision.retry_after_secs);
//!     }
//!
//!     let reads = ReadThroughCache::new(client.clone());
//!     let title: String = reads
//!         .get_or_compute("posts:1", settings.read_through.item_ttl(), || async {
//!             Ok::<_, resilient_cache::CacheError>("hello".to_string())
//!         })
//!         .await?;
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

mod builder;
mod client;
mod entry;
mod error;
mod events;
mod rate_limit;
mod read_through;
mod settings;
mod state;
mod store;
pub mod stores;
mod utils;

// Re-export public API
pub use builder::CacheClientBuilder;
pub use client::{CacheClient, ClientConfig};
pub use entry::CacheEntry;
pub use error::CacheError;
pub use events::{CacheEvent, EventSink, TracingSink};
pub use rate_limit::{Caller, LimitResolver, RateLimitDecision, RateLimitPolicy, RateLimiter};
pub use read_through::{ReadThroughCache, derive_key};
pub use settings::{
    FallbackSettings, PolicyClass, PolicySettings, RateLimitSettings, ReadThroughSettings,
    RemoteSettings, Settings,
};
pub use state::ConnectionState;
pub use store::{Connector, Store};
pub use stores::memory::{FallbackStore, FallbackStoreConfig, SweepConfig};
pub use stores::redis::{RedisConnector, RedisStore, RedisStoreConfig};
pub use utils::{MAX_KEY_LEN, escape_key_fragment};
