/// Error type for cache operations.
///
/// Only the input variants (`InvalidKey`, `InvalidTtl`, `InvalidPolicy`, `NotAnInteger`)
/// ever leave the [`CacheClient`](crate::CacheClient); remote failures are absorbed there
/// and rerouted to the fallback store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The key is empty, too long or contains forbidden characters.
    #[error("invalid cache key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    /// A TTL of zero was given.
    #[error("TTL must be greater than zero")]
    InvalidTtl,

    /// A rate limit policy was built with unusable parameters.
    #[error("invalid rate limit policy: {0}")]
    InvalidPolicy(String),

    /// `increment` was called on a value that is not a decimal integer.
    #[error("value at '{key}' is not an integer")]
    NotAnInteger { key: String },

    /// A remote cache operation failed.
    #[error("[{tier}] cache error for key '{key}': {message}")]
    Remote {
        tier: String,
        key: String,
        message: String,
    },

    /// A remote cache operation did not complete in time.
    #[error("{op} on '{key}' timed out after {after_ms}ms")]
    Timeout {
        op: &'static str,
        key: String,
        after_ms: u64,
    },

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CacheError {
    /// Create a new remote operation error.
    pub fn remote(
        tier: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CacheError::Remote {
            tier: tier.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    /// Whether this error was caused by the caller's input rather than the backend.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            CacheError::InvalidKey { .. }
                | CacheError::InvalidTtl
                | CacheError::InvalidPolicy(_)
                | CacheError::NotAnInteger { .. }
        )
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}
