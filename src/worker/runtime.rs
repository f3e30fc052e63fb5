//! The worker poll loop and per-message execution pipeline.
//!
//! Pipeline for each dequeued message:
//!
//! 1. claim the message id through the idempotency guard; duplicates are
//!    acked and dropped without side effects
//! 2. build a fresh unit of work for the message topic
//! 3. run it, retrying retryable failures up to `max_retries` extra attempts
//! 4. on success, publish a result envelope and ack
//! 5. on exhaustion (or a fatal failure), dead-letter and ack
//!
//! Every terminal outcome acks the source message exactly once, except when
//! publishing the outcome itself fails: the message is then left unacked so
//! the backend redelivers it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::metrics::{MetricsSink, NoopMetrics};
use crate::ops::{hb_key, Claim, IdempotencyGuard, OpsStore};
use crate::queue::{Message, QueueBackend, QueueError};

use super::heartbeat::spawn_heartbeat;
use super::registry::UnitOfWorkRegistry;
use super::{WorkError, WorkerConfig, WorkerError};

/// Exponential backoff for idle polls and transient dequeue errors.
struct Backoff {
    current: Duration,
    base: Duration,
    max: Duration,
}

impl Backoff {
    fn new(base: Duration, max: Duration) -> Self {
        Self {
            current: base,
            base,
            max,
        }
    }

    fn reset(&mut self) {
        self.current = self.base;
    }

    fn next(&mut self) -> Duration {
        let next = self.current;
        self.current = self.current.mul_f32(2.0).min(self.max);
        next
    }
}

pub struct WorkerRuntime {
    queue: Arc<dyn QueueBackend>,
    registry: UnitOfWorkRegistry,
    config: WorkerConfig,
    guard: Option<IdempotencyGuard>,
    ops: Option<Arc<dyn OpsStore>>,
    metrics: Arc<dyn MetricsSink>,
    running: RwLock<bool>,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerRuntime {
    pub fn new(
        queue: Arc<dyn QueueBackend>,
        registry: UnitOfWorkRegistry,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            queue,
            registry,
            config,
            guard: None,
            ops: None,
            metrics: Arc::new(NoopMetrics),
            running: RwLock::new(false),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Attach an ops store, enabling duplicate suppression and heartbeats.
    pub fn with_ops_store(mut self, store: Arc<dyn OpsStore>) -> Self {
        self.guard = Some(IdempotencyGuard::new(
            store.clone(),
            self.config.idempotency_ttl,
        ));
        self.ops = Some(store);
        self
    }

    /// Optionally plug in a metrics sink.
    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    /// Dequeue and process at most one message. Returns whether a message
    /// was processed. The building block `start` loops over, also usable
    /// directly for tests and drain scripts.
    pub async fn run_once(&self, timeout: Option<Duration>) -> Result<bool, WorkerError> {
        match self.queue.dequeue(&self.config.topic, timeout).await? {
            Some(message) => {
                self.process(message).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Spawn the background poll loop (and heartbeat, when configured).
    /// Returns immediately; call [`stop`](Self::stop) to shut down.
    pub async fn start(self: Arc<Self>) -> Result<(), WorkerError> {
        {
            let mut running = self.running.write().await;
            if *running {
                return Err(WorkerError::AlreadyRunning);
            }
            *running = true;
        }

        info!(
            topic = %self.config.topic,
            worker_id = %self.config.worker_id,
            "starting worker runtime"
        );

        let mut handles = self.handles.lock().await;

        if self.config.heartbeat.enabled {
            if let Some(store) = &self.ops {
                handles.push(spawn_heartbeat(
                    store.clone(),
                    hb_key(&self.config.service, &self.config.worker_id),
                    self.config.heartbeat.ttl,
                    self.config.heartbeat.interval,
                    self.shutdown_tx.subscribe(),
                ));
            }
        }

        let runtime = Arc::clone(&self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(5));
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    dequeued = runtime.queue.dequeue(&runtime.config.topic, runtime.config.poll_timeout) => {
                        match dequeued {
                            Ok(Some(message)) => {
                                backoff.reset();
                                if let Err(e) = runtime.process(message).await {
                                    error!(error = %e, "message processing failed");
                                }
                            }
                            Ok(None) => {
                                tokio::time::sleep(backoff.next()).await;
                            }
                            Err(e) => {
                                warn!(error = %e, "dequeue failed, backing off");
                                tokio::time::sleep(backoff.next()).await;
                            }
                        }
                    }
                }
            }
            debug!("worker loop stopped");
        }));

        Ok(())
    }

    /// Signal shutdown and wait (bounded) for background tasks to finish.
    pub async fn stop(&self) {
        info!(worker_id = %self.config.worker_id, "stopping worker runtime");
        let _ = self.shutdown_tx.send(true);
        {
            let mut running = self.running.write().await;
            *running = false;
        }
        let drained: Vec<_> = self.handles.lock().await.drain(..).collect();
        if tokio::time::timeout(Duration::from_secs(5), futures::future::join_all(drained))
            .await
            .is_err()
        {
            warn!("background tasks did not stop in time");
        }
    }

    async fn process(&self, message: Message) -> Result<(), WorkerError> {
        let started = Instant::now();
        self.metrics.inc_counter("worker.jobs_started", 1);

        let job_id = message
            .job_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if let Some(guard) = &self.guard {
            if guard.claim(&message.topic, &job_id).await == Claim::Duplicate {
                info!(%job_id, topic = %message.topic, "duplicate delivery, dropping");
                self.metrics.inc_counter("worker.jobs_duplicate", 1);
                self.queue.ack(&job_id).await?;
                return Ok(());
            }
        }

        let mut attempt = 0u32;
        let failure = loop {
            let mut unit = match self.registry.create(&message.topic) {
                Some(unit) => unit,
                None => {
                    break WorkError::fatal(format!(
                        "no unit of work registered for topic '{}'",
                        message.topic
                    ))
                }
            };
            match unit.run(message.payload.clone()).await {
                Ok(result) => {
                    self.publish_success(&message, &job_id, result).await?;
                    self.queue.ack(&job_id).await?;
                    self.metrics.inc_counter("worker.jobs_succeeded", 1);
                    self.metrics.observe_duration("worker.job", started.elapsed());
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        %job_id,
                        topic = %message.topic,
                        attempt,
                        max_retries = self.config.max_retries,
                        error = %e,
                        "retrying unit of work"
                    );
                    self.metrics.inc_counter("worker.jobs_retried", 1);
                    if !self.config.retry_backoff.is_zero() {
                        tokio::time::sleep(self.config.retry_backoff).await;
                    }
                }
                Err(e) => break e,
            }
        };

        self.finish_failure(&message, &job_id, &failure).await?;
        self.metrics.observe_duration("worker.job", started.elapsed());
        Ok(())
    }

    async fn publish_success(
        &self,
        message: &Message,
        job_id: &str,
        result: serde_json::Value,
    ) -> Result<(), WorkerError> {
        let mut envelope = Message::new(
            self.config.results_topic.clone(),
            json!({
                "status": "ok",
                "job_id": job_id,
                "run_id": message.run_id,
                "result": result,
            }),
        );
        envelope.run_id = message.run_id.clone();
        if let Err(e) = self
            .queue
            .enqueue(&self.config.results_topic, envelope)
            .await
        {
            // leave the source unacked so it is redelivered
            error!(%job_id, error = %e, "result publish failed");
            return Err(e.into());
        }
        Ok(())
    }

    /// Terminal failure path: dead-letter (or publish an error result when
    /// dead-lettering is disabled), then ack the source.
    async fn finish_failure(
        &self,
        message: &Message,
        job_id: &str,
        failure: &WorkError,
    ) -> Result<(), WorkerError> {
        error!(
            %job_id,
            topic = %message.topic,
            error = %failure,
            "unit of work failed terminally"
        );

        if self.config.enable_dlq {
            let task = serde_json::to_value(message).map_err(QueueError::from)?;
            let mut entry = Message::new(
                self.config.dlq_topic.clone(),
                json!({
                    "task": task,
                    "error": failure.to_string(),
                    "failed_at": Utc::now().to_rfc3339(),
                }),
            );
            entry.run_id = message.run_id.clone();
            if let Err(e) = self.queue.enqueue(&self.config.dlq_topic, entry).await {
                error!(%job_id, error = %e, "dead letter publish failed");
                return Err(e.into());
            }
            self.metrics.inc_counter("worker.jobs_dead_lettered", 1);
        } else {
            let mut envelope = Message::new(
                self.config.results_topic.clone(),
                json!({
                    "status": "error",
                    "job_id": job_id,
                    "run_id": message.run_id,
                    "error": failure.to_string(),
                }),
            );
            envelope.run_id = message.run_id.clone();
            if let Err(e) = self
                .queue
                .enqueue(&self.config.results_topic, envelope)
                .await
            {
                error!(%job_id, error = %e, "error result publish failed");
                return Err(e.into());
            }
            self.metrics.inc_counter("worker.jobs_failed", 1);
        }

        self.queue.ack(job_id).await?;
        Ok(())
    }
}
