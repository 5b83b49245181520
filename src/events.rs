//! Observable events emitted by the cache client.
//!
//! The client reports connection state transitions and absorbed remote failures to an
//! [`EventSink`]. Sinks never influence the client's behaviour: the same operation
//! returns the same result whichever sink is installed.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::{Arc, Mutex};
//! use resilient_cache::{CacheClientBuilder, CacheEvent, EventSink};
//!
//! struct BufferedSink {
//!     buffer: Mutex<Vec<CacheEvent>>,
//! }
//!
//! impl EventSink for BufferedSink {
//!     fn emit(&self, event: CacheEvent) {
//!         self.buffer.lock().unwrap().push(event);
//!     }
//! }
//!
//! let client = CacheClientBuilder::new()
//!     .event_sink(Arc::new(BufferedSink { buffer: Mutex::new(Vec::new()) }))
//!     .build();
//! ```

use crate::state::ConnectionState;

/// Events emitted by the [`CacheClient`](crate::CacheClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// The connection state machine moved.
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// One handshake attempt during `connect()` failed.
    ConnectAttemptFailed {
        /// 1-based attempt number.
        attempt: u32,
        error: String,
    },
    /// A remote operation failed and was served by the fallback store instead.
    RemoteFailure {
        op: &'static str,
        key: String,
        error: String,
    },
}

/// Trait for receiving cache events.
///
/// This is called synchronously in the hot path of cache operations.
/// Implementations should be fast (e.g., buffer events in memory).
pub trait EventSink: Send + Sync {
    /// Emit a single event.
    fn emit(&self, event: CacheEvent);
}

/// Default sink: writes every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: CacheEvent) {
        match event {
            CacheEvent::StateChanged { from, to } => {
                tracing::info!(%from, %to, "cache connection state changed");
            }
            CacheEvent::ConnectAttemptFailed { attempt, error } => {
                tracing::warn!(attempt, error = %error, "remote cache connection attempt failed");
            }
            CacheEvent::RemoteFailure { op, key, error } => {
                tracing::warn!(op, key = %key, error = %error, "remote cache operation failed, using fallback");
            }
        }
    }
}
