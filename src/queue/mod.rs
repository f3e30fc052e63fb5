//! Queue abstraction layer.
//!
//! Two implementations of [`QueueBackend`]:
//!
//! - [`MemoryQueue`]: in-process, visibility-timeout redelivery; for tests
//!   and local runs.
//! - [`RedisStreamsQueue`] (feature `redis`, default): Redis Streams with
//!   consumer groups and delayed requeue; for production.
//!
//! Both deliver at-least-once. Deduplication of side effects is the worker's
//! responsibility via [`crate::ops::IdempotencyGuard`].

mod error;
mod factory;
mod memory;
mod traits;

#[cfg(feature = "redis")]
pub mod redis;

pub use error::QueueError;
pub use factory::build_queue_backend;
pub use memory::{MemoryQueue, MemoryQueueConfig};
pub use traits::{Message, QueueBackend, DEFAULT_TOPIC};

#[cfg(feature = "redis")]
pub use redis::{RedisQueueConfig, RedisStreamsQueue};
