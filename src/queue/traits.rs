//! Core trait and message envelope for relayq queue backends.
//!
//! The backend abstraction is a single trait, [`QueueBackend`], with four
//! operations: `enqueue`, `dequeue`, `ack`, `requeue`. Implementations are
//! selected at construction time via [`crate::queue::build_queue_backend`].
//!
//! # Delivery contract
//!
//! - Topics are created lazily; dequeuing a never-enqueued topic is not an
//!   error.
//! - `dequeue` returns at most one message per call and blocks up to the
//!   given timeout (`None` = indefinitely, `Some(0)` = return immediately).
//! - `ack` is idempotent; acking an unknown or already-acked id is a no-op.
//! - A dequeued-but-unacked message becomes deliverable again: via a
//!   visibility timeout (in-process backend) or the consumer group's pending
//!   entry list (Redis backend). Redelivered messages join the current tail.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

use super::error::QueueError;

/// Topic used when a message carries no routing information of its own.
pub const DEFAULT_TOPIC: &str = "orchestrate";

/// A unit of traffic on a queue topic.
///
/// Immutable after enqueue except for `meta`, which the runtime may mutate on
/// requeue. On the Redis backend the `job_id` is the broker-assigned stream
/// entry id and must be treated as opaque.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Message {
    /// Assigned at enqueue time if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Correlates a message with the run that produced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Logical channel; also names the unit of work that handles the message.
    /// Accepts the legacy `orchestrator` key on the wire.
    #[serde(default, alias = "orchestrator")]
    pub topic: String,
    /// Handler input.
    #[serde(default)]
    pub payload: Value,
    /// Routing hints and runtime bookkeeping.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl Message {
    /// Create a message bound for `topic`.
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            job_id: None,
            run_id: None,
            topic: topic.into(),
            payload,
            meta: Map::new(),
        }
    }

    /// Attach a run id.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Topic a requeue should target: `meta.topic`, else the message's own
    /// topic, else [`DEFAULT_TOPIC`].
    pub fn requeue_topic(&self) -> &str {
        if let Some(t) = self.meta.get("topic").and_then(Value::as_str) {
            return t;
        }
        if !self.topic.is_empty() {
            return &self.topic;
        }
        DEFAULT_TOPIC
    }

    pub(crate) fn ensure_job_id(&mut self) -> String {
        match &self.job_id {
            Some(id) => id.clone(),
            None => {
                let id = Uuid::new_v4().to_string();
                self.job_id = Some(id.clone());
                id
            }
        }
    }
}

/// Core trait for queue operations.
///
/// # Implementation Notes
///
/// - `dequeue` is the only intended blocking point; all other operations
///   should return promptly.
/// - Within a single topic, messages are delivered in enqueue order to the
///   extent the backend provides FIFO semantics. No cross-topic ordering is
///   guaranteed.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Append a message to `topic`, assigning a `job_id` if missing.
    /// Returns the assigned id.
    async fn enqueue(&self, topic: &str, message: Message) -> Result<String, QueueError>;

    /// Take one message from `topic`, waiting up to `timeout`.
    ///
    /// `None` waits indefinitely; `Some(Duration::ZERO)` returns immediately
    /// with `Ok(None)` when nothing is ready.
    async fn dequeue(
        &self,
        topic: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>, QueueError>;

    /// Acknowledge a delivered message. Idempotent; unknown ids are a no-op.
    async fn ack(&self, job_id: &str) -> Result<(), QueueError>;

    /// Re-append a message to its topic (see [`Message::requeue_topic`]).
    ///
    /// With a non-zero `delay` the message becomes visible only after the
    /// delay elapses. Returns the new (possibly synthetic) job id.
    async fn requeue(&self, message: Message, delay: Duration) -> Result<String, QueueError>;
}
