//! Per-resource concurrency limiter for synchronous call paths.
//!
//! The dispatcher caps concurrent in-flight work per resource name with a
//! counting semaphore. Acquisition is non-blocking: a saturated resource
//! fails immediately with [`DispatchError::LimitExceeded`] rather than
//! queueing — callers that need queueing go through the queue backends
//! instead.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The named resource is at its concurrency limit; the caller must back
    /// off. Never retried internally.
    #[error("concurrency limit reached for '{0}'")]
    LimitExceeded(String),
}

/// Named-resource concurrency limiter.
///
/// Limits are fixed at construction; names absent from the map run without
/// gating. The permit is held for the duration of the unit of work and is
/// released on every exit path, including errors and panics, via RAII.
pub struct Dispatcher {
    semaphores: HashMap<String, Arc<Semaphore>>,
}

impl Dispatcher {
    pub fn new(limits: HashMap<String, usize>) -> Self {
        let semaphores = limits
            .into_iter()
            .map(|(name, max)| (name, Arc::new(Semaphore::new(max))))
            .collect();
        Self { semaphores }
    }

    /// Run `work` under the limit registered for `name`.
    pub async fn submit<F, T>(&self, name: &str, work: F) -> Result<T, DispatchError>
    where
        F: Future<Output = T>,
    {
        let _permit = match self.semaphores.get(name) {
            Some(sem) => match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    debug!(%name, "dispatch rejected: concurrency limit reached");
                    return Err(DispatchError::LimitExceeded(name.to_string()));
                }
            },
            None => None,
        };
        Ok(work.await)
    }

    /// Permits currently available for `name` (None if unlimited).
    pub fn available(&self, name: &str) -> Option<usize> {
        self.semaphores.get(name).map(|s| s.available_permits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn limits(name: &str, max: usize) -> HashMap<String, usize> {
        HashMap::from([(name.to_string(), max)])
    }

    #[tokio::test]
    async fn rejects_when_saturated_and_releases_after() {
        let dispatcher = Arc::new(Dispatcher::new(limits("rag", 1)));
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let holder = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .submit("rag", async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        let rejected = dispatcher.submit("rag", async { 42 }).await;
        assert!(matches!(rejected, Err(DispatchError::LimitExceeded(_))));

        release_tx.send(()).unwrap();
        holder.await.unwrap().unwrap();

        let accepted = dispatcher.submit("rag", async { 42 }).await.unwrap();
        assert_eq!(accepted, 42);
    }

    #[tokio::test]
    async fn permit_is_released_when_work_errors() {
        let dispatcher = Dispatcher::new(limits("rag", 1));
        let failed: Result<Result<(), &str>, _> =
            dispatcher.submit("rag", async { Err("boom") }).await;
        assert!(failed.unwrap().is_err());
        assert_eq!(dispatcher.available("rag"), Some(1));
    }

    #[tokio::test]
    async fn unknown_names_run_unlimited() {
        let dispatcher = Dispatcher::new(HashMap::new());
        for _ in 0..16 {
            dispatcher.submit("anything", async {}).await.unwrap();
        }
        assert_eq!(dispatcher.available("anything"), None);
    }

    #[tokio::test]
    async fn limit_counts_concurrent_not_total() {
        let dispatcher = Dispatcher::new(limits("rag", 2));
        // Sequential submissions never saturate a limit of 2.
        for _ in 0..5 {
            dispatcher
                .submit("rag", async {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                })
                .await
                .unwrap();
        }
        assert_eq!(dispatcher.available("rag"), Some(2));
    }
}
