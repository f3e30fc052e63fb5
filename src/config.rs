//! Environment-driven configuration.
//!
//! All settings have working defaults so a bare `Settings::from_env()` runs
//! against a local Redis (or the in-process backend) without any environment
//! at all. Parsing never fails: malformed values fall back to the default
//! with a warning, so a typo in one variable does not take the service down.

use std::time::Duration;

use tracing::warn;

use crate::persistence::AllowlistPolicy;
use crate::queue::DEFAULT_TOPIC;
use crate::worker::{HeartbeatSettings, WorkerConfig};

/// Which queue backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueBackendKind {
    Memory,
    #[default]
    Redis,
}

impl QueueBackendKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "memory" | "in_memory" => Some(QueueBackendKind::Memory),
            "redis" => Some(QueueBackendKind::Redis),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub backend: QueueBackendKind,
    pub redis_url: String,
    /// Key prefix shared by streams, delayed sets, and ops keys.
    pub namespace: String,
    /// Consumer group name.
    pub group: String,
    /// Consumer name within the group; generated per process when unset.
    pub consumer: String,
    pub stream_tasks: String,
    pub stream_results: String,
    pub stream_dlq: String,
    /// Approximate stream length cap, unbounded when `None`.
    pub stream_maxlen: Option<usize>,
    /// Max delayed messages promoted per dequeue.
    pub delayed_drain_batch: usize,
    /// In-process backend only: how long an unacked message stays invisible.
    pub visibility_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub service: String,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub enable_dlq: bool,
    pub heartbeat_enabled: bool,
    pub heartbeat_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub idempotency_ttl: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct PersistenceSettings {
    /// Full write allow-list override; empty means "use defaults".
    pub write_tables: Vec<String>,
    /// Full read allow-list override; empty means "all known tables".
    pub read_tables: Vec<String>,
    /// Extra tables subtracted from the default write allow-list.
    pub write_deny: Vec<String>,
}

impl PersistenceSettings {
    /// Materialize the allow-list policy these settings describe.
    pub fn policy(&self) -> AllowlistPolicy {
        AllowlistPolicy::with_defaults(
            non_empty(&self.read_tables),
            non_empty(&self.write_tables),
            &self.write_deny,
        )
    }
}

fn non_empty(list: &[String]) -> Option<Vec<String>> {
    if list.is_empty() {
        None
    } else {
        Some(list.to_vec())
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub queue: QueueSettings,
    pub worker: WorkerSettings,
    pub persistence: PersistenceSettings,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup. `from_env` passes the process
    /// environment; tests pass a map.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = Env { lookup };

        let queue = QueueSettings {
            backend: env.parsed("QUEUE_BACKEND", QueueBackendKind::default(), |v| {
                QueueBackendKind::parse(v)
            }),
            redis_url: env.string("REDIS_URL", "redis://127.0.0.1:6379"),
            namespace: env.string("REDIS_NAMESPACE", "agentic"),
            group: env.string("REDIS_GROUP", "rag-workers"),
            consumer: env
                .optional("REDIS_CONSUMER")
                .unwrap_or_else(generated_consumer_name),
            stream_tasks: env.string("REDIS_STREAM_TASKS", DEFAULT_TOPIC),
            stream_results: env.string("REDIS_STREAM_RESULTS", "results"),
            stream_dlq: env.string("REDIS_STREAM_DLQ", "dead_letter"),
            stream_maxlen: env
                .optional("REDIS_STREAM_MAXLEN")
                .and_then(|v| parse_or_warn("REDIS_STREAM_MAXLEN", &v)),
            delayed_drain_batch: env.parsed("REDIS_DELAYED_DRAIN_BATCH", 50, |v| {
                v.parse().ok()
            }),
            visibility_timeout: env.duration_secs("QUEUE_VISIBILITY_TIMEOUT", 30),
        };

        let worker = WorkerSettings {
            service: env.string("WORKER_SERVICE", "relayq"),
            max_retries: env.parsed("REDIS_MAX_RETRIES", 2, |v| v.parse().ok()),
            retry_backoff: Duration::from_millis(env.parsed(
                "REDIS_RETRY_BACKOFF_MS",
                0u64,
                |v| v.parse().ok(),
            )),
            enable_dlq: env.flag("ENABLE_DLQ", true),
            heartbeat_enabled: env.flag("OPS_HB_ENABLED", true),
            heartbeat_ttl: env.duration_secs("OPS_HB_TTL", 30),
            heartbeat_interval: env.duration_secs("OPS_HB_INTERVAL", 10),
            idempotency_ttl: env.duration_secs("OPS_IDEMP_TTL", 60),
        };

        let persistence = PersistenceSettings {
            write_tables: env.list("PERSIST_WRITE_TABLES"),
            read_tables: env.list("PERSIST_READ_TABLES"),
            write_deny: env.list("PERSIST_WRITE_DENY"),
        };

        Settings {
            queue,
            worker,
            persistence,
        }
    }

    /// Derive a [`WorkerConfig`] consuming the task stream.
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            service: self.worker.service.clone(),
            topic: self.queue.stream_tasks.clone(),
            results_topic: self.queue.stream_results.clone(),
            dlq_topic: self.queue.stream_dlq.clone(),
            max_retries: self.worker.max_retries,
            retry_backoff: self.worker.retry_backoff,
            enable_dlq: self.worker.enable_dlq,
            idempotency_ttl: self.worker.idempotency_ttl,
            heartbeat: HeartbeatSettings {
                enabled: self.worker.heartbeat_enabled,
                ttl: self.worker.heartbeat_ttl,
                interval: self.worker.heartbeat_interval,
            },
            ..WorkerConfig::default()
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn generated_consumer_name() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("c-{}", &hex[..8])
}

fn parse_or_warn<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(%key, %value, "unparseable value, using default");
            None
        }
    }
}

struct Env<F: Fn(&str) -> Option<String>> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, key: &str, default: T, parse: impl Fn(&str) -> Option<T>) -> T {
        match self.optional(key) {
            None => default,
            Some(value) => parse(value.trim()).unwrap_or_else(|| {
                warn!(%key, %value, "unparseable value, using default");
                default
            }),
        }
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.parsed(key, default, |v| match v.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
    }

    fn duration_secs(&self, key: &str, default_secs: u64) -> Duration {
        Duration::from_secs(self.parsed(key, default_secs, |v| v.parse().ok()))
    }

    /// Comma-separated list, trimmed, empty entries dropped.
    fn list(&self, key: &str) -> Vec<String> {
        self.optional(key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}
