//! Metrics seam.
//!
//! Components never touch a global counter store; they receive an
//! `Arc<dyn MetricsSink>` at construction. One process-lifetime sink is built
//! at startup and shared by reference. [`NoopMetrics`] is the default;
//! [`InProcessMetrics`] accumulates counters and latency aggregates until a
//! real exporter is wired.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Metrics sink exposing counters and durations without coupling to a
/// specific backend.
pub trait MetricsSink: Send + Sync + 'static {
    fn inc_counter(&self, name: &str, value: u64);
    fn observe_duration(&self, _name: &str, _dur: Duration) {}
}

/// No-op metrics sink.
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn inc_counter(&self, _name: &str, _value: u64) {}
}

#[derive(Clone, Copy)]
struct LatencyAgg {
    count: u64,
    total_ms: f64,
    min_ms: f64,
    max_ms: f64,
}

/// One row of [`InProcessMetrics::snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsRow {
    pub name: String,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat_min_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat_max_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat_avg_ms: Option<f64>,
}

/// In-process counter/latency accumulator.
///
/// Persistence keys are `"<operation>:<table>"`; worker counters are flat
/// names such as `worker.jobs_dead_lettered`.
#[derive(Default)]
pub struct InProcessMetrics {
    counters: Mutex<HashMap<String, u64>>,
    latencies: Mutex<HashMap<String, LatencyAgg>>,
}

impl InProcessMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter.
    pub fn counter(&self, name: &str) -> u64 {
        *self.counters.lock().unwrap().get(name).unwrap_or(&0)
    }

    /// A read-only view of everything recorded so far, sorted by name.
    pub fn snapshot(&self) -> Vec<MetricsRow> {
        let counters = self.counters.lock().unwrap();
        let latencies = self.latencies.lock().unwrap();
        let mut names: Vec<&String> = counters.keys().chain(latencies.keys()).collect();
        names.sort();
        names.dedup();

        let mut rows = Vec::with_capacity(names.len());
        for name in names {
            let count = counters.get(name).copied().unwrap_or(0);
            let lat = latencies.get(name);
            rows.push(MetricsRow {
                name: name.clone(),
                count,
                lat_min_ms: lat.map(|l| round2(l.min_ms)),
                lat_max_ms: lat.map(|l| round2(l.max_ms)),
                lat_avg_ms: lat.map(|l| round2(l.total_ms / l.count as f64)),
            });
        }
        rows
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

impl MetricsSink for InProcessMetrics {
    fn inc_counter(&self, name: &str, value: u64) {
        *self
            .counters
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert(0) += value;
    }

    fn observe_duration(&self, name: &str, dur: Duration) {
        let ms = dur.as_secs_f64() * 1000.0;
        let mut latencies = self.latencies.lock().unwrap();
        latencies
            .entry(name.to_string())
            .and_modify(|agg| {
                agg.count += 1;
                agg.total_ms += ms;
                agg.min_ms = agg.min_ms.min(ms);
                agg.max_ms = agg.max_ms.max(ms);
            })
            .or_insert(LatencyAgg {
                count: 1,
                total_ms: ms,
                min_ms: ms,
                max_ms: ms,
            });
    }
}
