//! Store implementations for the cache library.

pub mod memory;
pub mod redis;

pub use self::memory::{FallbackStore, FallbackStoreConfig, SweepConfig};
pub use self::redis::{RedisConnector, RedisStore, RedisStoreConfig};
