//! Governance facade over a storage adapter.
//!
//! Every call checks the operation's table against the relevant allow-list
//! before the adapter is touched, strips null fields from outgoing writes
//! (so adapter-side defaults are not clobbered), wraps each adapter call
//! with timing + `(operation, table)` counters, and converts adapter faults
//! into [`PersistenceError::Adapter`] with context. The read-only facade
//! statically removes the write surface regardless of allow-list
//! configuration.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error};

use crate::metrics::{MetricsSink, NoopMetrics};

use super::adapter::{PersistenceAdapter, Query, Record};
use super::error::{Access, PersistenceError};
use super::policy::AllowlistPolicy;

/// High-level persistence facade adding governance and cross-cutting hooks.
pub struct PersistenceService {
    adapter: Arc<dyn PersistenceAdapter>,
    policy: AllowlistPolicy,
    metrics: Arc<dyn MetricsSink>,
}

impl PersistenceService {
    pub fn new(adapter: Arc<dyn PersistenceAdapter>, policy: AllowlistPolicy) -> Self {
        Self {
            adapter,
            policy,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Plug in a metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    fn check_table(&self, table: &str, access: Access) -> Result<(), PersistenceError> {
        if table.trim().is_empty() {
            return Err(PersistenceError::Validation(
                "table name must not be empty".to_string(),
            ));
        }
        if !self.policy.allows(table, access) {
            return Err(PersistenceError::TableNotAllowed {
                table: table.to_string(),
                access,
            });
        }
        Ok(())
    }

    /// Drop null fields so writes do not overwrite adapter-side defaults.
    fn clean(record: Record) -> Record {
        record.into_iter().filter(|(_, v)| !v.is_null()).collect()
    }

    fn finish<T>(
        &self,
        op: &'static str,
        table: &str,
        started: Instant,
        result: Result<T, PersistenceError>,
    ) -> Result<T, PersistenceError> {
        let elapsed = started.elapsed();
        let key = format!("{}:{}", op, table);
        self.metrics.inc_counter(&key, 1);
        self.metrics.observe_duration(&key, elapsed);
        debug!(%op, %table, elapsed_ms = elapsed.as_millis() as u64, "persistence call finished");

        result.map_err(|e| {
            if e.is_permission() {
                return e;
            }
            error!(%op, %table, error = %e, "adapter call failed");
            match e {
                // already carries op/table context, do not nest
                wrapped @ PersistenceError::Adapter { .. } => wrapped,
                other => PersistenceError::Adapter {
                    op,
                    table: table.to_string(),
                    message: other.to_string(),
                },
            }
        })
    }

    // -------- write APIs --------

    pub async fn write(&self, table: &str, record: Record) -> Result<Record, PersistenceError> {
        self.check_table(table, Access::Write)?;
        let started = Instant::now();
        let result = self.adapter.write(table, Self::clean(record)).await;
        self.finish("write", table, started, result)
    }

    pub async fn batch_write(
        &self,
        table: &str,
        records: Vec<Record>,
    ) -> Result<Vec<Record>, PersistenceError> {
        self.check_table(table, Access::Write)?;
        let cleaned = records.into_iter().map(Self::clean).collect();
        let started = Instant::now();
        let result = self.adapter.batch_write(table, cleaned).await;
        self.finish("batch_write", table, started, result)
    }

    pub async fn upsert(
        &self,
        table: &str,
        record: Record,
        on_conflict: Option<&[String]>,
    ) -> Result<Record, PersistenceError> {
        self.check_table(table, Access::Write)?;
        let started = Instant::now();
        let result = self
            .adapter
            .upsert(table, Self::clean(record), on_conflict)
            .await;
        self.finish("upsert", table, started, result)
    }

    // -------- read/query APIs --------

    pub async fn read(
        &self,
        table: &str,
        id_value: &Value,
        id_column: &str,
    ) -> Result<Option<Record>, PersistenceError> {
        self.check_table(table, Access::Read)?;
        let started = Instant::now();
        let result = self.adapter.read(table, id_value, id_column).await;
        self.finish("read", table, started, result)
    }

    pub async fn query(
        &self,
        table: &str,
        query: &Query,
    ) -> Result<Vec<Record>, PersistenceError> {
        self.check_table(table, Access::Read)?;
        let started = Instant::now();
        let result = self.adapter.query(table, query).await;
        self.finish("query", table, started, result)
    }

    pub async fn get_columns(&self, table: &str) -> Result<Vec<String>, PersistenceError> {
        self.check_table(table, Access::Read)?;
        let started = Instant::now();
        let result = self.adapter.get_columns(table).await;
        self.finish("get_columns", table, started, result)
    }
}

/// Read-only facade forwarding `read`/`query`/`get_columns` only.
///
/// Write attempts raise [`PersistenceError::PermissionDenied`] regardless of
/// what the wrapped service's allow-list would permit. This is the only
/// persistence handle ever handed to read-oriented callers.
pub struct ReadOnlyPersistence {
    inner: Arc<PersistenceService>,
}

impl ReadOnlyPersistence {
    pub fn new(inner: Arc<PersistenceService>) -> Self {
        Self { inner }
    }

    fn write_blocked() -> PersistenceError {
        PersistenceError::PermissionDenied(
            "write not permitted on read-only facade".to_string(),
        )
    }

    pub async fn write(&self, _table: &str, _record: Record) -> Result<Record, PersistenceError> {
        Err(Self::write_blocked())
    }

    pub async fn batch_write(
        &self,
        _table: &str,
        _records: Vec<Record>,
    ) -> Result<Vec<Record>, PersistenceError> {
        Err(Self::write_blocked())
    }

    pub async fn upsert(
        &self,
        _table: &str,
        _record: Record,
        _on_conflict: Option<&[String]>,
    ) -> Result<Record, PersistenceError> {
        Err(Self::write_blocked())
    }

    pub async fn read(
        &self,
        table: &str,
        id_value: &Value,
        id_column: &str,
    ) -> Result<Option<Record>, PersistenceError> {
        self.inner.read(table, id_value, id_column).await
    }

    pub async fn query(
        &self,
        table: &str,
        query: &Query,
    ) -> Result<Vec<Record>, PersistenceError> {
        self.inner.query(table, query).await
    }

    pub async fn get_columns(&self, table: &str) -> Result<Vec<String>, PersistenceError> {
        self.inner.get_columns(table).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::InProcessMetrics;
    use crate::persistence::InMemoryAdapter;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(value: serde_json::Value) -> Record {
        value.as_object().unwrap().clone()
    }

    /// Counts adapter invocations so tests can prove governance rejections
    /// never reach the backend.
    struct SpyAdapter {
        inner: InMemoryAdapter,
        writes: AtomicUsize,
    }

    impl SpyAdapter {
        fn new() -> Self {
            Self {
                inner: InMemoryAdapter::new(),
                writes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PersistenceAdapter for SpyAdapter {
        async fn write(&self, table: &str, rec: Record) -> Result<Record, PersistenceError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.write(table, rec).await
        }

        async fn batch_write(
            &self,
            table: &str,
            recs: Vec<Record>,
        ) -> Result<Vec<Record>, PersistenceError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.batch_write(table, recs).await
        }

        async fn upsert(
            &self,
            table: &str,
            rec: Record,
            on_conflict: Option<&[String]>,
        ) -> Result<Record, PersistenceError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.upsert(table, rec, on_conflict).await
        }

        async fn read(
            &self,
            table: &str,
            id_value: &Value,
            id_column: &str,
        ) -> Result<Option<Record>, PersistenceError> {
            self.inner.read(table, id_value, id_column).await
        }

        async fn query(&self, table: &str, q: &Query) -> Result<Vec<Record>, PersistenceError> {
            self.inner.query(table, q).await
        }

        async fn get_columns(&self, table: &str) -> Result<Vec<String>, PersistenceError> {
            self.inner.get_columns(table).await
        }
    }

    #[tokio::test]
    async fn disallowed_write_never_reaches_adapter() {
        let spy = Arc::new(SpyAdapter::new());
        let service = PersistenceService::new(
            spy.clone(),
            AllowlistPolicy::new(None, Some(vec!["leads".into()])),
        );

        let err = service
            .write("campaigns", record(json!({"name": "Q3"})))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::TableNotAllowed { .. }));
        assert_eq!(spy.writes.load(Ordering::SeqCst), 0);

        service
            .write("leads", record(json!({"name": "A"})))
            .await
            .unwrap();
        assert_eq!(spy.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn write_drops_null_fields() {
        let adapter = Arc::new(InMemoryAdapter::new());
        let service = PersistenceService::new(adapter, AllowlistPolicy::unrestricted());
        let stored = service
            .write("leads", record(json!({"email": null, "name": "A"})))
            .await
            .unwrap();
        assert!(!stored.contains_key("email"));
        assert_eq!(stored["name"], json!("A"));
        assert!(stored.contains_key("id"));
    }

    #[tokio::test]
    async fn read_allowlist_is_independent_of_write() {
        let adapter = Arc::new(InMemoryAdapter::new());
        let service = PersistenceService::new(
            adapter,
            AllowlistPolicy::new(Some(vec!["leads".into()]), Some(vec!["messages".into()])),
        );

        // readable but not writable
        assert!(service.query("leads", &Query::default()).await.is_ok());
        assert!(service
            .write("leads", record(json!({"a": 1})))
            .await
            .is_err());
        // writable but not readable
        assert!(service
            .write("messages", record(json!({"a": 1})))
            .await
            .is_ok());
        assert!(service.query("messages", &Query::default()).await.is_err());
    }

    #[tokio::test]
    async fn table_check_is_case_insensitive() {
        let adapter = Arc::new(InMemoryAdapter::new());
        let service = PersistenceService::new(
            adapter,
            AllowlistPolicy::new(None, Some(vec!["leads".into()])),
        );
        assert!(service
            .write("LEADS", record(json!({"a": 1})))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn empty_table_name_is_validation_error() {
        let adapter = Arc::new(InMemoryAdapter::new());
        let service = PersistenceService::new(adapter, AllowlistPolicy::unrestricted());
        let err = service.query("  ", &Query::default()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Validation(_)));
    }

    #[tokio::test]
    async fn adapter_failures_are_wrapped_with_context() {
        struct FailingAdapter;

        #[async_trait]
        impl PersistenceAdapter for FailingAdapter {
            async fn write(&self, _: &str, _: Record) -> Result<Record, PersistenceError> {
                Err(PersistenceError::Validation("backend exploded".into()))
            }
            async fn batch_write(
                &self,
                _: &str,
                _: Vec<Record>,
            ) -> Result<Vec<Record>, PersistenceError> {
                unreachable!()
            }
            async fn upsert(
                &self,
                _: &str,
                _: Record,
                _: Option<&[String]>,
            ) -> Result<Record, PersistenceError> {
                unreachable!()
            }
            async fn read(
                &self,
                _: &str,
                _: &Value,
                _: &str,
            ) -> Result<Option<Record>, PersistenceError> {
                unreachable!()
            }
            async fn query(&self, _: &str, _: &Query) -> Result<Vec<Record>, PersistenceError> {
                unreachable!()
            }
            async fn get_columns(&self, _: &str) -> Result<Vec<String>, PersistenceError> {
                unreachable!()
            }
        }

        let service =
            PersistenceService::new(Arc::new(FailingAdapter), AllowlistPolicy::unrestricted());
        let err = service
            .write("leads", record(json!({"a": 1})))
            .await
            .unwrap_err();
        match err {
            PersistenceError::Adapter { op, table, message } => {
                assert_eq!(op, "write");
                assert_eq!(table, "leads");
                assert!(message.contains("backend exploded"));
            }
            other => panic!("expected Adapter error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn adapter_errors_are_not_double_wrapped() {
        struct PreWrappedAdapter;

        #[async_trait]
        impl PersistenceAdapter for PreWrappedAdapter {
            async fn write(&self, _: &str, _: Record) -> Result<Record, PersistenceError> {
                Err(PersistenceError::Adapter {
                    op: "write",
                    table: "leads".into(),
                    message: "connection reset".into(),
                })
            }
            async fn batch_write(
                &self,
                _: &str,
                _: Vec<Record>,
            ) -> Result<Vec<Record>, PersistenceError> {
                unreachable!()
            }
            async fn upsert(
                &self,
                _: &str,
                _: Record,
                _: Option<&[String]>,
            ) -> Result<Record, PersistenceError> {
                unreachable!()
            }
            async fn read(
                &self,
                _: &str,
                _: &Value,
                _: &str,
            ) -> Result<Option<Record>, PersistenceError> {
                unreachable!()
            }
            async fn query(&self, _: &str, _: &Query) -> Result<Vec<Record>, PersistenceError> {
                unreachable!()
            }
            async fn get_columns(&self, _: &str) -> Result<Vec<String>, PersistenceError> {
                unreachable!()
            }
        }

        let service =
            PersistenceService::new(Arc::new(PreWrappedAdapter), AllowlistPolicy::unrestricted());
        let err = service
            .write("leads", record(json!({"a": 1})))
            .await
            .unwrap_err();
        match err {
            PersistenceError::Adapter { message, .. } => {
                assert_eq!(message, "connection reset");
                assert!(!message.contains("adapter error during"));
            }
            other => panic!("expected Adapter error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn metrics_are_keyed_by_operation_and_table() {
        let metrics = Arc::new(InProcessMetrics::new());
        let service = PersistenceService::new(
            Arc::new(InMemoryAdapter::new()),
            AllowlistPolicy::unrestricted(),
        )
        .with_metrics(metrics.clone());

        service
            .write("leads", record(json!({"a": 1})))
            .await
            .unwrap();
        service.query("leads", &Query::default()).await.unwrap();
        service.query("leads", &Query::default()).await.unwrap();

        assert_eq!(metrics.counter("write:leads"), 1);
        assert_eq!(metrics.counter("query:leads"), 2);
    }

    #[tokio::test]
    async fn readonly_facade_blocks_writes_even_on_allowed_tables() {
        let adapter = Arc::new(InMemoryAdapter::new());
        let service = Arc::new(PersistenceService::new(
            adapter,
            AllowlistPolicy::new(None, Some(vec!["leads".into()])),
        ));
        service
            .write("leads", record(json!({"name": "seed"})))
            .await
            .unwrap();

        let facade = ReadOnlyPersistence::new(service);
        let err = facade
            .write("leads", record(json!({"name": "X"})))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::PermissionDenied(_)));
        assert!(matches!(
            facade.upsert("leads", Record::new(), None).await.unwrap_err(),
            PersistenceError::PermissionDenied(_)
        ));
        assert!(matches!(
            facade.batch_write("leads", vec![]).await.unwrap_err(),
            PersistenceError::PermissionDenied(_)
        ));

        // reads still forward
        let rows = facade.query("leads", &Query::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!facade.get_columns("leads").await.unwrap().is_empty());
    }
}
