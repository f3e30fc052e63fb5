//! Duplicate-suppression claims over an [`OpsStore`](super::OpsStore).

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::{idemp_key, OpsStore};

/// Outcome of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The claim won; the caller should process the message.
    Acquired,
    /// Another worker holds (or held, within the TTL) the claim; the caller
    /// should ack and drop without side effects.
    Duplicate,
    /// The lock store was unreachable. Processing proceeds without the
    /// deduplication guarantee: pipeline availability outranks it.
    Unverified,
}

/// Distributed set-if-absent claim preventing duplicate side effects when a
/// message is delivered more than once.
///
/// Claims expire by TTL and are never explicitly released; the TTL bounds how
/// long a duplicate can be suppressed after a crash.
pub struct IdempotencyGuard {
    store: Arc<dyn OpsStore>,
    ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn OpsStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Attempt to claim `(topic, message_id)`. Fails open on store errors.
    pub async fn claim(&self, topic: &str, message_id: &str) -> Claim {
        let key = idemp_key(topic, message_id);
        match self.store.put_if_absent(&key, "1", self.ttl).await {
            Ok(true) => Claim::Acquired,
            Ok(false) => Claim::Duplicate,
            Err(e) => {
                warn!(%key, error = %e, "idempotency store unreachable, proceeding without claim");
                Claim::Unverified
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::MemoryOpsStore;
    use crate::queue::QueueError;
    use async_trait::async_trait;

    #[tokio::test]
    async fn second_claim_within_ttl_is_duplicate() {
        let guard = IdempotencyGuard::new(
            Arc::new(MemoryOpsStore::new()),
            Duration::from_secs(60),
        );
        assert_eq!(guard.claim("rag:tasks", "1-0").await, Claim::Acquired);
        assert_eq!(guard.claim("rag:tasks", "1-0").await, Claim::Duplicate);
        // A different message id claims independently.
        assert_eq!(guard.claim("rag:tasks", "2-0").await, Claim::Acquired);
    }

    struct BrokenStore;

    #[async_trait]
    impl OpsStore for BrokenStore {
        async fn put(&self, _: &str, _: &str, _: Duration) -> Result<(), QueueError> {
            Err(QueueError::Unavailable("down".into()))
        }

        async fn put_if_absent(
            &self,
            _: &str,
            _: &str,
            _: Duration,
        ) -> Result<bool, QueueError> {
            Err(QueueError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn store_failure_fails_open() {
        let guard = IdempotencyGuard::new(Arc::new(BrokenStore), Duration::from_secs(60));
        assert_eq!(guard.claim("t", "1-0").await, Claim::Unverified);
    }
}
