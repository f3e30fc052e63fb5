//! Backend selection.
//!
//! Backends are chosen explicitly at construction time from configuration,
//! never by structural typing: `memory` for tests/local runs, `redis` for
//! production.

use std::sync::Arc;

use crate::config::{QueueBackendKind, Settings};

use super::error::QueueError;
use super::memory::{MemoryQueue, MemoryQueueConfig};
use super::traits::QueueBackend;

/// Build the configured queue backend.
pub async fn build_queue_backend(settings: &Settings) -> Result<Arc<dyn QueueBackend>, QueueError> {
    match settings.queue.backend {
        QueueBackendKind::Memory => {
            let config = MemoryQueueConfig {
                visibility_timeout: settings.queue.visibility_timeout,
                ..MemoryQueueConfig::default()
            };
            Ok(Arc::new(MemoryQueue::new(config)))
        }
        #[cfg(feature = "redis")]
        QueueBackendKind::Redis => {
            let pool = super::redis::create_redis_pool(&settings.queue.redis_url).await?;
            let config = super::redis::RedisQueueConfig {
                namespace: settings.queue.namespace.clone(),
                group: settings.queue.group.clone(),
                consumer: settings.queue.consumer.clone(),
                stream_maxlen: settings.queue.stream_maxlen,
                delayed_drain_batch: settings.queue.delayed_drain_batch,
            };
            Ok(Arc::new(super::redis::RedisStreamsQueue::new(pool, config)))
        }
        #[cfg(not(feature = "redis"))]
        QueueBackendKind::Redis => Err(QueueError::Configuration(
            "redis backend requested but the 'redis' feature is disabled".to_string(),
        )),
    }
}
