//! Redis Streams queue backend.
//!
//! Production implementation of [`QueueBackend`](crate::queue::QueueBackend):
//!
//! - One stream per topic: `<ns>:stream:<topic>` (append-only log)
//! - One consumer group per topic: `<ns>:grp:<topic>` — each entry is
//!   delivered to exactly one consumer in the group
//! - Messages stored as a single JSON field `data`
//! - `job_id` is the Redis stream entry id (e.g. `1716234567890-0`)
//! - A per-job index hash `<ns>:job:<entry_id>` records topic/group so `ack`
//!   can resolve the stream without caller-side state
//! - Delayed requeue parks entries in a ZSET `<ns>:delayed:<topic>` scored by
//!   due time; due entries are drained in small batches on each dequeue to
//!   bound burst amplification
//!
//! Valkey works unchanged; point the URL at a Valkey instance.

mod pool;
mod queue;

use bb8_redis::bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use uuid::Uuid;

pub use pool::{create_redis_pool, create_redis_pool_with_config, RedisPoolConfig};

use super::error::QueueError;

/// Tunables for the Redis Streams backend.
#[derive(Debug, Clone)]
pub struct RedisQueueConfig {
    /// Key namespace prefix.
    pub namespace: String,
    /// Consumer group name used for dequeues.
    pub group: String,
    /// Consumer identity within the group.
    pub consumer: String,
    /// Approximate per-stream length cap applied on append (None = unbounded).
    pub stream_maxlen: Option<usize>,
    /// Max delayed entries moved into the stream per drain call.
    pub delayed_drain_batch: usize,
}

impl Default for RedisQueueConfig {
    fn default() -> Self {
        Self {
            namespace: "agentic".to_string(),
            group: "rag-workers".to_string(),
            consumer: generated_consumer_name(),
            stream_maxlen: None,
            delayed_drain_batch: 50,
        }
    }
}

/// Generate a consumer identity of the form `c-<8 hex>`.
pub fn generated_consumer_name() -> String {
    format!("c-{}", &Uuid::new_v4().simple().to_string()[..8])
}

/// Redis Streams implementation of the queue contract.
#[derive(Clone)]
pub struct RedisStreamsQueue {
    pool: Pool<RedisConnectionManager>,
    config: RedisQueueConfig,
}

impl RedisStreamsQueue {
    pub fn new(pool: Pool<RedisConnectionManager>, config: RedisQueueConfig) -> Self {
        Self { pool, config }
    }

    pub fn config(&self) -> &RedisQueueConfig {
        &self.config
    }

    pub(crate) async fn conn(
        &self,
    ) -> Result<PooledConnection<'_, RedisConnectionManager>, QueueError> {
        self.pool
            .get()
            .await
            .map_err(|e| QueueError::Unavailable(format!("failed to get Redis connection: {}", e)))
    }

    // Key helpers
    pub(crate) fn stream_key(&self, topic: &str) -> String {
        keys::stream(&self.config.namespace, topic)
    }

    pub(crate) fn group_name(&self, topic: &str) -> String {
        keys::group(&self.config.namespace, topic)
    }

    pub(crate) fn delayed_key(&self, topic: &str) -> String {
        keys::delayed(&self.config.namespace, topic)
    }

    pub(crate) fn job_index_key(&self, job_id: &str) -> String {
        keys::job_index(&self.config.namespace, job_id)
    }
}

pub(crate) mod keys {
    pub fn stream(ns: &str, topic: &str) -> String {
        format!("{}:stream:{}", ns, topic)
    }

    pub fn group(ns: &str, topic: &str) -> String {
        format!("{}:grp:{}", ns, topic)
    }

    pub fn delayed(ns: &str, topic: &str) -> String {
        format!("{}:delayed:{}", ns, topic)
    }

    pub fn job_index(ns: &str, job_id: &str) -> String {
        format!("{}:job:{}", ns, job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_naming_is_namespace_prefixed() {
        assert_eq!(keys::stream("agentic", "rag:tasks"), "agentic:stream:rag:tasks");
        assert_eq!(keys::group("agentic", "rag:tasks"), "agentic:grp:rag:tasks");
        assert_eq!(keys::delayed("agentic", "rag:tasks"), "agentic:delayed:rag:tasks");
        assert_eq!(keys::job_index("agentic", "1716-0"), "agentic:job:1716-0");
    }

    #[test]
    fn generated_consumer_names_are_unique() {
        let a = generated_consumer_name();
        let b = generated_consumer_name();
        assert!(a.starts_with("c-") && a.len() == 10);
        assert_ne!(a, b);
    }
}
