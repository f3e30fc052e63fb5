//! In-memory persistence adapter.
//!
//! Reference adapter for tests and local experimentation. Not optimized for
//! large datasets; the goal is API parity with the durable adapter for the
//! supported operator subset (equality and wildcard filters, ordering,
//! projection, limit/offset).

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::adapter::{cmp_values, wildcard_match, PersistenceAdapter, Query, Record};
use super::error::PersistenceError;

#[derive(Default)]
struct Tables {
    rows: HashMap<String, Vec<Record>>,
    counters: HashMap<String, u64>,
}

/// Thread-safe in-memory adapter with sequential id assignment.
#[derive(Default)]
pub struct InMemoryAdapter {
    inner: Mutex<Tables>,
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all stored rows across all tables. Test helper.
    pub fn clear_tables(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.rows.clear();
        inner.counters.clear();
    }

    fn matches(record: &Record, filters: &Record) -> bool {
        for (key, expected) in filters {
            let actual = record.get(key).unwrap_or(&Value::Null);
            match expected.as_str() {
                Some(pattern) if pattern.contains('%') => {
                    if !wildcard_match(actual, pattern) {
                        return false;
                    }
                }
                _ => {
                    if actual != expected {
                        return false;
                    }
                }
            }
        }
        true
    }

    fn store(tables: &mut Tables, table: &str, mut record: Record) -> Record {
        let provided = record.get("id").filter(|v| !v.is_null()).cloned();
        let id = match provided {
            Some(id) => id,
            None => {
                let counter = tables.counters.entry(table.to_string()).or_insert(1);
                let id = Value::String(counter.to_string());
                *counter += 1;
                id
            }
        };
        record.insert("id".to_string(), id);
        tables
            .rows
            .entry(table.to_string())
            .or_default()
            .push(record.clone());
        record
    }
}

#[async_trait]
impl PersistenceAdapter for InMemoryAdapter {
    async fn write(&self, table: &str, record: Record) -> Result<Record, PersistenceError> {
        let mut inner = self.inner.lock().unwrap();
        Ok(Self::store(&mut inner, table, record))
    }

    async fn batch_write(
        &self,
        table: &str,
        records: Vec<Record>,
    ) -> Result<Vec<Record>, PersistenceError> {
        let mut inner = self.inner.lock().unwrap();
        Ok(records
            .into_iter()
            .map(|record| Self::store(&mut inner, table, record))
            .collect())
    }

    async fn upsert(
        &self,
        table: &str,
        record: Record,
        on_conflict: Option<&[String]>,
    ) -> Result<Record, PersistenceError> {
        let conflict = match on_conflict {
            Some(cols) if !cols.is_empty() => cols,
            _ => {
                let mut inner = self.inner.lock().unwrap();
                return Ok(Self::store(&mut inner, table, record));
            }
        };

        let mut inner = self.inner.lock().unwrap();
        let rows = inner.rows.entry(table.to_string()).or_default();
        let matched = rows.iter_mut().find(|existing| {
            conflict.iter().all(|col| {
                existing.get(col).unwrap_or(&Value::Null)
                    == record.get(col).unwrap_or(&Value::Null)
            })
        });

        if let Some(existing) = matched {
            let id = existing.get("id").cloned();
            for (key, value) in record {
                existing.insert(key, value);
            }
            if let Some(id) = id {
                existing.insert("id".to_string(), id);
            }
            return Ok(existing.clone());
        }
        Ok(Self::store(&mut inner, table, record))
    }

    async fn read(
        &self,
        table: &str,
        id_value: &Value,
        id_column: &str,
    ) -> Result<Option<Record>, PersistenceError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.rows.get(table).and_then(|rows| {
            rows.iter()
                .find(|row| row.get(id_column).unwrap_or(&Value::Null) == id_value)
                .cloned()
        }))
    }

    async fn query(&self, table: &str, query: &Query) -> Result<Vec<Record>, PersistenceError> {
        let inner = self.inner.lock().unwrap();
        let mut results: Vec<Record> = inner
            .rows
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| match &query.filters {
                        Some(filters) => Self::matches(row, filters),
                        None => true,
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(inner);

        if let Some(order_by) = &query.order_by {
            results.sort_by(|a, b| {
                let ord = cmp_values(
                    a.get(order_by).unwrap_or(&Value::Null),
                    b.get(order_by).unwrap_or(&Value::Null),
                );
                if query.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        if let Some(select) = &query.select {
            results = results
                .into_iter()
                .map(|row| {
                    select
                        .iter()
                        .map(|col| {
                            (col.clone(), row.get(col).cloned().unwrap_or(Value::Null))
                        })
                        .collect()
                })
                .collect();
        }

        if let Some(offset) = query.offset {
            results = results.into_iter().skip(offset).collect();
        }
        if let Some(limit) = query.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    async fn get_columns(&self, table: &str) -> Result<Vec<String>, PersistenceError> {
        let inner = self.inner.lock().unwrap();
        let mut columns = BTreeSet::new();
        if let Some(rows) = inner.rows.get(table) {
            for row in rows {
                columns.extend(row.keys().cloned());
            }
        }
        Ok(columns.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn write_assigns_sequential_ids_and_preserves_provided() {
        let adapter = InMemoryAdapter::new();
        let first = adapter
            .write("leads", record(json!({"name": "A"})))
            .await
            .unwrap();
        let second = adapter
            .write("leads", record(json!({"name": "B"})))
            .await
            .unwrap();
        assert_eq!(first["id"], json!("1"));
        assert_eq!(second["id"], json!("2"));

        let explicit = adapter
            .write("leads", record(json!({"id": "lead-7", "name": "C"})))
            .await
            .unwrap();
        assert_eq!(explicit["id"], json!("lead-7"));
    }

    #[tokio::test]
    async fn upsert_merges_on_conflict_preserving_id() {
        let adapter = InMemoryAdapter::new();
        let conflict = vec!["email".to_string()];
        let first = adapter
            .upsert(
                "leads",
                record(json!({"email": "a@x.io", "name": "A"})),
                Some(&conflict),
            )
            .await
            .unwrap();
        let second = adapter
            .upsert(
                "leads",
                record(json!({"email": "a@x.io", "name": "A2", "score": 9})),
                Some(&conflict),
            )
            .await
            .unwrap();

        assert_eq!(first["id"], second["id"]);
        assert_eq!(second["name"], json!("A2"));
        assert_eq!(second["score"], json!(9));

        let rows = adapter.query("leads", &Query::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn upsert_without_conflict_inserts() {
        let adapter = InMemoryAdapter::new();
        adapter
            .upsert("leads", record(json!({"name": "A"})), None)
            .await
            .unwrap();
        adapter
            .upsert("leads", record(json!({"name": "A"})), Some(&[]))
            .await
            .unwrap();
        let rows = adapter.query("leads", &Query::default()).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn query_filters_equality_and_wildcard() {
        let adapter = InMemoryAdapter::new();
        for (name, status) in [("Alice Smith", "new"), ("Bob Smith", "won"), ("Carol", "new")] {
            adapter
                .write("leads", record(json!({"name": name, "status": status})))
                .await
                .unwrap();
        }

        let mut filters = Record::new();
        filters.insert("status".into(), json!("new"));
        let rows = adapter
            .query("leads", &Query::default().filters(filters))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);

        let mut filters = Record::new();
        filters.insert("name".into(), json!("%smith%"));
        let rows = adapter
            .query("leads", &Query::default().filters(filters))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn query_orders_projects_and_limits() {
        let adapter = InMemoryAdapter::new();
        for (name, score) in [("a", 3), ("b", 1), ("c", 2)] {
            adapter
                .write("leads", record(json!({"name": name, "score": score})))
                .await
                .unwrap();
        }

        let rows = adapter
            .query(
                "leads",
                &Query::default()
                    .order_by("score", true)
                    .select(vec!["name".into()])
                    .limit(2),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], record(json!({"name": "a"})));
        assert_eq!(rows[1], record(json!({"name": "c"})));
    }

    #[tokio::test]
    async fn query_offset_skips_rows() {
        let adapter = InMemoryAdapter::new();
        for i in 0..5 {
            adapter
                .write("leads", record(json!({"n": i})))
                .await
                .unwrap();
        }
        let rows = adapter
            .query(
                "leads",
                &Query::default().order_by("n", false).offset(2).limit(2),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["n"], json!(2));
        assert_eq!(rows[1]["n"], json!(3));
    }

    #[tokio::test]
    async fn read_and_columns() {
        let adapter = InMemoryAdapter::new();
        let stored = adapter
            .write("leads", record(json!({"name": "A", "email": "a@x.io"})))
            .await
            .unwrap();

        let found = adapter
            .read("leads", &stored["id"], "id")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["name"], json!("A"));

        let by_email = adapter
            .read("leads", &json!("a@x.io"), "email")
            .await
            .unwrap();
        assert!(by_email.is_some());

        let columns = adapter.get_columns("leads").await.unwrap();
        assert_eq!(columns, vec!["email", "id", "name"]);
        assert!(adapter.get_columns("empty").await.unwrap().is_empty());
    }
}
