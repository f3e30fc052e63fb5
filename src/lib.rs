//! relayq — reliable task dispatch plus governed persistence.
//!
//! This crate is the systems core of a back-office automation platform. It
//! provides:
//!
//! - [`queue`]: topic-partitioned queue backends with at-least-once delivery.
//!   An in-process backend ([`MemoryQueue`]) implements visibility-timeout
//!   redelivery for tests and local runs; a Redis Streams backend
//!   ([`queue::RedisStreamsQueue`]) provides consumer-group delivery and
//!   delayed requeue for production.
//! - [`worker`]: a poll loop ([`WorkerRuntime`]) that claims messages through
//!   an idempotency lock, runs a registered [`UnitOfWork`], retries bounded,
//!   dead-letters on exhaustion, and publishes liveness heartbeats.
//! - [`persistence`]: a governance facade ([`PersistenceService`]) enforcing
//!   per-operation table allow-lists over pluggable storage adapters, with a
//!   read-only facade for least-privilege callers.
//! - [`dispatcher`]: a per-resource concurrency limiter for synchronous call
//!   paths that do not go through the queue.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use relayq::{Message, MemoryQueue, QueueBackend, UnitOfWorkRegistry, WorkerRuntime};
//! use std::sync::Arc;
//!
//! let queue = Arc::new(MemoryQueue::with_defaults());
//! queue.enqueue("orchestrate", Message::new("orchestrate", serde_json::json!({"x": 1}))).await?;
//!
//! let mut registry = UnitOfWorkRegistry::new();
//! registry.register("orchestrate", Arc::new(|| Box::new(MyUnit) as Box<dyn relayq::UnitOfWork>));
//!
//! let worker = WorkerRuntime::new(queue, registry, Default::default());
//! worker.run_once(Some(std::time::Duration::from_millis(100))).await?;
//! ```
//!
//! # Delivery semantics
//!
//! The design is at-least-once with deduplication: a message may be delivered
//! more than once (visibility timeout expiry, consumer crash), but the worker
//! suppresses duplicate side effects through a TTL'd idempotency claim. It is
//! not transactional exactly-once.

pub mod config;
pub mod dispatcher;
pub mod metrics;
pub mod ops;
pub mod persistence;
pub mod queue;
pub mod worker;

pub use config::Settings;
pub use dispatcher::{DispatchError, Dispatcher};
pub use metrics::{InProcessMetrics, MetricsSink, NoopMetrics};
pub use ops::{IdempotencyGuard, MemoryOpsStore, OpsStore};
pub use persistence::{
    AllowlistPolicy, InMemoryAdapter, PersistenceAdapter, PersistenceError, PersistenceService,
    Query, ReadOnlyPersistence, Record,
};
pub use queue::{Message, MemoryQueue, QueueBackend, QueueError, DEFAULT_TOPIC};
pub use worker::{
    UnitOfWork, UnitOfWorkFactory, UnitOfWorkRegistry, WorkError, WorkerConfig, WorkerError,
    WorkerRuntime,
};

#[cfg(feature = "redis")]
pub use ops::RedisOpsStore;
#[cfg(feature = "redis")]
pub use queue::RedisStreamsQueue;
