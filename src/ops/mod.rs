//! Operational key-value plumbing: idempotency locks and liveness heartbeats.
//!
//! Both concerns reduce to a TTL'd key-value store ([`OpsStore`]): heartbeats
//! are plain puts refreshed faster than they expire, idempotency claims are
//! set-if-absent. The Redis implementation namespaces keys the same way the
//! queue backend does; the in-memory implementation backs tests and local
//! runs.

mod idempotency;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::queue::QueueError;

pub use idempotency::{Claim, IdempotencyGuard};

/// Build an idempotency lock key (without namespace).
pub fn idemp_key(topic: &str, message_id: &str) -> String {
    format!("ops:idemp:{}:{}", topic, message_id)
}

/// Build a heartbeat key (without namespace).
pub fn hb_key(service: &str, worker_id: &str) -> String {
    format!("ops:hb:{}:{}", service, worker_id)
}

/// Volatile key-value store with per-key TTL.
#[async_trait]
pub trait OpsStore: Send + Sync {
    /// Set `key` to `value`, expiring after `ttl`.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), QueueError>;

    /// Set `key` only if absent (or expired). Returns whether the claim won.
    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, QueueError>;
}

/// In-process [`OpsStore`].
#[derive(Default)]
pub struct MemoryOpsStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryOpsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current (unexpired) value of `key`. Test and diagnostics aid.
    pub fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap();
        entries.get(key).and_then(|(value, expires_at)| {
            (*expires_at > Instant::now()).then(|| value.clone())
        })
    }
}

#[async_trait]
impl OpsStore for MemoryOpsStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), QueueError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, QueueError> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        if let Some((_, expires_at)) = entries.get(key) {
            if *expires_at > now {
                return Ok(false);
            }
        }
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(true)
    }
}

/// Redis-backed [`OpsStore`], sharing the queue's key namespace.
#[cfg(feature = "redis")]
pub struct RedisOpsStore {
    pool: bb8_redis::bb8::Pool<bb8_redis::RedisConnectionManager>,
    namespace: String,
}

#[cfg(feature = "redis")]
impl RedisOpsStore {
    pub fn new(
        pool: bb8_redis::bb8::Pool<bb8_redis::RedisConnectionManager>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        if self.namespace.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.namespace, key)
        }
    }

    async fn conn(
        &self,
    ) -> Result<
        bb8_redis::bb8::PooledConnection<'_, bb8_redis::RedisConnectionManager>,
        QueueError,
    > {
        self.pool
            .get()
            .await
            .map_err(|e| QueueError::Unavailable(format!("failed to get Redis connection: {}", e)))
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl OpsStore for RedisOpsStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), QueueError> {
        use redis::AsyncCommands;
        let mut conn = self.conn().await?;
        let _: () = conn
            .set_ex(self.full_key(key), value, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, QueueError> {
        let mut conn = self.conn().await?;
        let res: Option<String> = redis::cmd("SET")
            .arg(self.full_key(key))
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut *conn)
            .await?;
        Ok(res.is_some())
    }
}
