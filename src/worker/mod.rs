//! Worker runtime: poll loop, retry policy, dead-lettering, heartbeats.

mod error;
mod heartbeat;
mod registry;
mod runtime;

use std::time::Duration;

use uuid::Uuid;

use crate::queue::DEFAULT_TOPIC;

pub use error::{WorkError, WorkerError};
pub use registry::{UnitOfWork, UnitOfWorkFactory, UnitOfWorkRegistry};
pub use runtime::WorkerRuntime;

/// Liveness heartbeat settings. The TTL should be a small multiple of the
/// interval so one missed beat does not mark the worker dead.
#[derive(Debug, Clone)]
pub struct HeartbeatSettings {
    pub enabled: bool,
    pub ttl: Duration,
    pub interval: Duration,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(30),
            interval: Duration::from_secs(10),
        }
    }
}

/// Tuning knobs for a [`WorkerRuntime`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Service name used in heartbeat keys.
    pub service: String,
    /// Topic this worker consumes.
    pub topic: String,
    /// Topic result envelopes are published to.
    pub results_topic: String,
    /// Topic exhausted messages are dead-lettered to.
    pub dlq_topic: String,
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Pause between attempts. Zero retries immediately.
    pub retry_backoff: Duration,
    /// When false, failures publish an error result instead of dead-lettering.
    pub enable_dlq: bool,
    /// Per-poll dequeue timeout for the background loop.
    pub poll_timeout: Option<Duration>,
    /// How long a processed message id suppresses duplicate deliveries.
    pub idempotency_ttl: Duration,
    pub heartbeat: HeartbeatSettings,
    /// Stable identity for heartbeats and logs, generated when not supplied.
    pub worker_id: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            service: "relayq".to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            results_topic: "results".to_string(),
            dlq_topic: "dead_letter".to_string(),
            max_retries: 2,
            retry_backoff: Duration::ZERO,
            enable_dlq: true,
            poll_timeout: Some(Duration::from_secs(1)),
            idempotency_ttl: Duration::from_secs(60),
            heartbeat: HeartbeatSettings::default(),
            worker_id: generated_worker_id(),
        }
    }
}

fn generated_worker_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("w-{}", &hex[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct() {
        let a = generated_worker_id();
        let b = generated_worker_id();
        assert!(a.starts_with("w-"));
        assert_eq!(a.len(), 10);
        assert_ne!(a, b);
    }
}
