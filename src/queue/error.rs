//! Backend-agnostic error types for relayq queue backends.
//!
//! All backend implementations map their internal errors to these variants so
//! the worker runtime can handle failures uniformly. Note that an empty
//! dequeue is `Ok(None)`, never an error.

use thiserror::Error;

/// Errors that can occur during queue backend operations.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Backend is unavailable (connection lost, service down, etc.)
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal backend error
    #[error("internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Returns true if this error is potentially recoverable with a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Unavailable(_))
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Unavailable(err.to_string())
    }
}
