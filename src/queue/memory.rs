//! In-process queue backend with visibility-timeout redelivery.
//!
//! Intended for tests and local runs. Semantics mirror the Redis backend
//! closely enough that transient-failure and redelivery paths can be
//! exercised without a broker: a dequeued message moves into an in-flight
//! map with an expiry deadline, and a background reclaimer re-appends it to
//! its topic if it is not acked in time.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::error::QueueError;
use super::traits::{Message, QueueBackend};

/// Tunables for the in-process backend.
#[derive(Debug, Clone, Copy)]
pub struct MemoryQueueConfig {
    /// How long a dequeued message stays hidden before it is made visible
    /// again if unacked.
    pub visibility_timeout: Duration,
    /// How often the reclaimer scans for expired in-flight records and due
    /// delayed messages.
    pub reclaim_interval: Duration,
}

impl Default for MemoryQueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            reclaim_interval: Duration::from_secs(1),
        }
    }
}

/// Bookkeeping for a message between dequeue and ack. Owned exclusively by
/// the backend.
struct InFlightRecord {
    message: Message,
    expire_at: Instant,
}

struct Shared {
    /// Per-topic FIFO deques, created lazily. Each topic has its own lock.
    topics: RwLock<HashMap<String, Arc<Mutex<VecDeque<Message>>>>>,
    inflight: Mutex<HashMap<String, InFlightRecord>>,
    /// Requeued-with-delay messages, drained by the reclaimer once due.
    delayed: Mutex<Vec<(Message, Instant)>>,
    /// Wakes all blocked dequeuers whenever any topic receives a message;
    /// dequeuers re-check their own topic after waking.
    notify: Notify,
    visibility_timeout: Duration,
}

impl Shared {
    fn topic_queue(&self, topic: &str) -> Arc<Mutex<VecDeque<Message>>> {
        if let Some(q) = self.topics.read().unwrap().get(topic) {
            return q.clone();
        }
        let mut topics = self.topics.write().unwrap();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .clone()
    }

    fn push(&self, topic: &str, message: Message) {
        self.topic_queue(topic).lock().unwrap().push_back(message);
        self.notify.notify_waiters();
    }

    fn try_take(&self, topic: &str) -> Option<Message> {
        let queue = self.topic_queue(topic);
        let message = queue.lock().unwrap().pop_front()?;
        let job_id = message.job_id.clone().unwrap_or_default();
        self.inflight.lock().unwrap().insert(
            job_id,
            InFlightRecord {
                message: message.clone(),
                expire_at: Instant::now() + self.visibility_timeout,
            },
        );
        Some(message)
    }

    /// Re-append expired in-flight records and due delayed messages to their
    /// topics. Each expired record is reclaimed at most once per scan.
    fn reclaim(&self) {
        let now = Instant::now();
        let mut moved = 0usize;

        let expired: Vec<Message> = {
            let mut inflight = self.inflight.lock().unwrap();
            let ids: Vec<String> = inflight
                .iter()
                .filter(|(_, rec)| rec.expire_at <= now)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| inflight.remove(&id).map(|rec| rec.message))
                .collect()
        };
        for message in expired {
            let topic = message.requeue_topic().to_string();
            warn!(job_id = ?message.job_id, %topic, "visibility timeout expired, requeuing");
            self.topic_queue(&topic).lock().unwrap().push_back(message);
            moved += 1;
        }

        let due: Vec<Message> = {
            let mut delayed = self.delayed.lock().unwrap();
            let mut ready = Vec::new();
            delayed.retain(|(message, due_at)| {
                if *due_at <= now {
                    ready.push(message.clone());
                    false
                } else {
                    true
                }
            });
            ready
        };
        for message in due {
            let topic = message.requeue_topic().to_string();
            self.topic_queue(&topic).lock().unwrap().push_back(message);
            moved += 1;
        }

        if moved > 0 {
            self.notify.notify_waiters();
        }
    }
}

/// Thread-safe in-process queue backend.
pub struct MemoryQueue {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    reclaimer: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryQueue {
    /// Create a backend and spawn its reclaimer task. Must be called from
    /// within a tokio runtime.
    pub fn new(config: MemoryQueueConfig) -> Self {
        let shared = Arc::new(Shared {
            topics: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            delayed: Mutex::new(Vec::new()),
            notify: Notify::new(),
            visibility_timeout: config.visibility_timeout,
        });
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let reclaimer_shared = shared.clone();
        let interval = config.reclaim_interval;
        let handle = tokio::spawn(async move {
            debug!("starting in-flight reclaimer");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => reclaimer_shared.reclaim(),
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("in-flight reclaimer stopped");
        });

        Self {
            shared,
            shutdown_tx,
            reclaimer: Mutex::new(Some(handle)),
        }
    }

    /// Create a backend with default tunables.
    pub fn with_defaults() -> Self {
        Self::new(MemoryQueueConfig::default())
    }

    /// Stop the reclaimer task, joining it with a bounded timeout.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.reclaimer.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
        }
        self.shared.notify.notify_waiters();
    }

    /// Number of messages currently in flight (dequeued, unacked). Test and
    /// diagnostics aid.
    pub fn inflight_len(&self) -> usize {
        self.shared.inflight.lock().unwrap().len()
    }

    /// Force an expiry scan without waiting for the reclaim interval. Test
    /// aid; production callers rely on the background task.
    pub fn reclaim_now(&self) {
        self.shared.reclaim();
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn enqueue(&self, topic: &str, mut message: Message) -> Result<String, QueueError> {
        let job_id = message.ensure_job_id();
        self.shared.push(topic, message);
        debug!(%job_id, %topic, "enqueued message");
        Ok(job_id)
    }

    async fn dequeue(
        &self,
        topic: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>, QueueError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(message) = self.shared.try_take(topic) {
                return Ok(Some(message));
            }

            // Register the waiter before the final emptiness check so a
            // notify between check and await is not lost.
            let mut notified = std::pin::pin!(self.shared.notify.notified());
            notified.as_mut().enable();
            if let Some(message) = self.shared.try_take(topic) {
                return Ok(Some(message));
            }

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    if tokio::time::timeout(deadline - now, notified).await.is_err() {
                        // Last chance: a message may have landed while the
                        // timer fired.
                        return Ok(self.shared.try_take(topic));
                    }
                }
            }
        }
    }

    async fn ack(&self, job_id: &str) -> Result<(), QueueError> {
        self.shared.inflight.lock().unwrap().remove(job_id);
        Ok(())
    }

    async fn requeue(&self, message: Message, delay: Duration) -> Result<String, QueueError> {
        let topic = message.requeue_topic().to_string();
        let mut message = message;
        let job_id = message.ensure_job_id();
        if delay > Duration::ZERO {
            self.shared
                .delayed
                .lock()
                .unwrap()
                .push((message, Instant::now() + delay));
            return Ok(job_id);
        }
        self.shared.push(&topic, message);
        Ok(job_id)
    }
}
