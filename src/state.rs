use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::events::{CacheEvent, EventSink};

/// Connection state of the [`CacheClient`](crate::CacheClient).
///
/// ```text
/// Disconnected --connect()--> Connecting --handshake ok--> Connected
///                                 |                            |
///                          retries exhausted            remote op failed
///                                 v                            v
///                              Degraded <----------------------+
///                                 |
///                  heartbeat ok / reconnect() --> Connected
/// ```
///
/// Only `Connected` sends operations to the remote cache; every other state serves
/// them from the fallback store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
}

impl ConnectionState {
    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Degraded => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Degraded,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free holder of the current state.
///
/// Transitions are compare-and-set, so when many requests observe the same remote
/// failure only one of them performs (and reports) the transition.
pub(crate) struct StateCell {
    state: AtomicU8,
    sink: Arc<dyn EventSink>,
}

impl StateCell {
    pub(crate) fn new(sink: Arc<dyn EventSink>) -> Self {
        StateCell {
            state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
            sink,
        }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`. Returns `false` if the state was not `from`.
    pub(crate) fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        if from == to {
            return self.get() == from;
        }

        let moved = self
            .state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if moved {
            self.sink.emit(CacheEvent::StateChanged { from, to });
        }
        moved
    }

    pub(crate) fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }
}
