//! Storage adapter contract.
//!
//! Adapters implement a deliberately small surface: equality/substring
//! filtering, projection, ordering, limit/offset. Swapping adapters must not
//! change observable query results for the supported operators; the in-memory
//! adapter is the reference semantics.

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::error::PersistenceError;

/// A stored record: a JSON object plus a server- or client-assigned `id`.
pub type Record = Map<String, Value>;

/// Query parameters for [`PersistenceAdapter::query`].
///
/// A filter value that is a string containing `%` performs case-insensitive
/// substring matching; any other value is exact-match equality.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filters: Option<Record>,
    pub order_by: Option<String>,
    pub descending: bool,
    /// Column projection, applied after filtering and sorting.
    pub select: Option<Vec<String>>,
    /// Row offset, applied after sorting (and projection).
    pub offset: Option<usize>,
    /// Row cap, applied last.
    pub limit: Option<usize>,
}

impl Query {
    pub fn filters(mut self, filters: Record) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order_by = Some(column.into());
        self.descending = descending;
        self
    }

    pub fn select(mut self, columns: Vec<String>) -> Self {
        self.select = Some(columns);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Contract for storage adapters (in-memory, Postgres).
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Insert a record, assigning an `id` when none is provided. Returns the
    /// stored record.
    async fn write(&self, table: &str, record: Record) -> Result<Record, PersistenceError>;

    /// Insert several records, preserving order.
    async fn batch_write(
        &self,
        table: &str,
        records: Vec<Record>,
    ) -> Result<Vec<Record>, PersistenceError>;

    /// Insert-or-merge. With `on_conflict` columns, the first existing row
    /// matching all of them is updated in place (incoming fields overwrite,
    /// `id` preserved); otherwise the record is inserted.
    async fn upsert(
        &self,
        table: &str,
        record: Record,
        on_conflict: Option<&[String]>,
    ) -> Result<Record, PersistenceError>;

    /// Fetch one record by `id_column` equality.
    async fn read(
        &self,
        table: &str,
        id_value: &Value,
        id_column: &str,
    ) -> Result<Option<Record>, PersistenceError>;

    /// Filter/sort/project/paginate.
    async fn query(&self, table: &str, query: &Query) -> Result<Vec<Record>, PersistenceError>;

    /// Sorted union of column names observed in the table.
    async fn get_columns(&self, table: &str) -> Result<Vec<String>, PersistenceError>;
}

/// Case-insensitive match where `%` acts as a multi-character wildcard gap.
/// Non-string values never match.
pub(crate) fn wildcard_match(value: &Value, pattern: &str) -> bool {
    let Some(haystack) = value.as_str() else {
        return false;
    };
    let haystack = haystack.to_lowercase();
    let pattern = pattern.to_lowercase();
    let mut pos = 0usize;
    for part in pattern.split('%') {
        if part.is_empty() {
            continue;
        }
        match haystack[pos..].find(part) {
            Some(idx) => pos = pos + idx + part.len(),
            None => return false,
        }
    }
    true
}

/// Total order over JSON values for `order_by`.
///
/// Type rank matches Postgres jsonb ordering (null < string < number < bool <
/// array < object) so both adapters sort mixed columns identically.
pub(crate) fn cmp_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::String(_) => 1,
            Value::Number(_) => 2,
            Value::Bool(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wildcard_is_case_insensitive_substring() {
        assert!(wildcard_match(&json!("Alice Smith"), "%smith%"));
        assert!(wildcard_match(&json!("alice"), "AL%CE"));
        assert!(!wildcard_match(&json!("bob"), "%alice%"));
        assert!(!wildcard_match(&json!(42), "%4%"));
        // parts must appear in order
        assert!(!wildcard_match(&json!("ce ali"), "ali%ce"));
    }

    #[test]
    fn value_ordering_is_total() {
        assert_eq!(
            cmp_values(&json!(1), &json!(2)),
            std::cmp::Ordering::Less
        );
        assert_eq!(
            cmp_values(&json!("a"), &json!("b")),
            std::cmp::Ordering::Less
        );
        // null sorts before everything
        assert_eq!(
            cmp_values(&Value::Null, &json!("a")),
            std::cmp::Ordering::Less
        );
        // strings sort before numbers (jsonb rank)
        assert_eq!(
            cmp_values(&json!("z"), &json!(0)),
            std::cmp::Ordering::Less
        );
    }
}
