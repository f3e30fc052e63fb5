//! Periodic liveness heartbeat.
//!
//! Writes a TTL'd timestamp under `ops:hb:<service>:<worker>` on a fixed
//! interval. The TTL is longer than the interval, so a key that expires means
//! the worker missed several beats and should be treated as dead.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::ops::OpsStore;

pub(crate) fn spawn_heartbeat(
    store: Arc<dyn OpsStore>,
    key: String,
    ttl: Duration,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Utc::now().to_rfc3339();
                    if let Err(e) = store.put(&key, &now, ttl).await {
                        // a missed beat is tolerable; the TTL covers gaps
                        warn!(%key, error = %e, "heartbeat write failed");
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        debug!(%key, "heartbeat task stopping");
                        return;
                    }
                }
            }
        }
    })
}
