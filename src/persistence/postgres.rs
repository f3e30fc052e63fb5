//! Postgres adapter storing one JSONB document per row.
//!
//! Tables are created lazily as `(id TEXT PRIMARY KEY, data JSONB NOT NULL)`
//! so the schema never has to be migrated ahead of a new table appearing in
//! the allow-list. Filters compare against `data->>'col'` text projections
//! (`ILIKE` when the filter value contains `%`), and ordering uses the raw
//! `data->'col'` jsonb value so results rank the same way the in-memory
//! adapter ranks them.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;
use uuid::Uuid;

use super::adapter::{PersistenceAdapter, Query, Record};
use super::error::PersistenceError;

pub struct PostgresAdapter {
    pool: PgPool,
    // tables already ensured this process lifetime
    created: Mutex<HashSet<String>>,
}

fn db_err(op: &'static str, table: &str, err: sqlx::Error) -> PersistenceError {
    PersistenceError::Adapter {
        op,
        table: table.to_string(),
        message: err.to_string(),
    }
}

/// Table and column names are interpolated into SQL, so they are restricted
/// to lowercase identifier characters up front.
fn validate_identifier(name: &str) -> Result<(), PersistenceError> {
    let ok = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(PersistenceError::Validation(format!(
            "invalid identifier '{}'",
            name
        )))
    }
}

/// Text form used when comparing jsonb fields against filter values, mirrors
/// what `data->>'col'` yields on the database side.
fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl PostgresAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            created: Mutex::new(HashSet::new()),
        }
    }

    pub async fn connect(url: &str) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|e| db_err("connect", "-", e))?;
        Ok(Self::new(pool))
    }

    async fn ensure_table(&self, table: &str) -> Result<(), PersistenceError> {
        validate_identifier(table)?;
        {
            let created = self.created.lock().unwrap();
            if created.contains(table) {
                return Ok(());
            }
        }
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (id TEXT PRIMARY KEY, data JSONB NOT NULL)"
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err("ensure_table", table, e))?;
        debug!(%table, "table ensured");
        self.created.lock().unwrap().insert(table.to_string());
        Ok(())
    }

    async fn insert(&self, table: &str, mut record: Record) -> Result<Record, PersistenceError> {
        let id = match record.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        record.insert("id".to_string(), Value::String(id.clone()));
        sqlx::query(&format!(
            "INSERT INTO \"{table}\" (id, data) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data"
        ))
        .bind(&id)
        .bind(Value::Object(record.clone()))
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("write", table, e))?;
        Ok(record)
    }
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<Record, sqlx::Error> {
    let data: Value = row.try_get("data")?;
    match data {
        Value::Object(map) => Ok(map),
        other => Ok(Record::from_iter([("data".to_string(), other)])),
    }
}

fn project(record: Record, select: Option<&Vec<String>>) -> Record {
    match select {
        None => record,
        Some(columns) => columns
            .iter()
            .map(|c| (c.clone(), record.get(c).cloned().unwrap_or(Value::Null)))
            .collect(),
    }
}

#[async_trait]
impl PersistenceAdapter for PostgresAdapter {
    async fn write(&self, table: &str, record: Record) -> Result<Record, PersistenceError> {
        self.ensure_table(table).await?;
        self.insert(table, record).await
    }

    async fn batch_write(
        &self,
        table: &str,
        records: Vec<Record>,
    ) -> Result<Vec<Record>, PersistenceError> {
        self.ensure_table(table).await?;
        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            stored.push(self.insert(table, record).await?);
        }
        Ok(stored)
    }

    async fn upsert(
        &self,
        table: &str,
        record: Record,
        on_conflict: Option<&[String]>,
    ) -> Result<Record, PersistenceError> {
        self.ensure_table(table).await?;
        let columns = match on_conflict {
            Some(cols) if !cols.is_empty() => cols,
            _ => return self.insert(table, record).await,
        };

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT id, data FROM \"{table}\" WHERE "));
        for (i, column) in columns.iter().enumerate() {
            validate_identifier(column)?;
            if i > 0 {
                builder.push(" AND ");
            }
            builder.push(format!("data->>'{column}' IS NOT DISTINCT FROM "));
            builder.push_bind(record.get(column.as_str()).and_then(value_to_text));
        }
        builder.push(" LIMIT 1");
        let existing = builder
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err("upsert", table, e))?;

        match existing {
            None => self.insert(table, record).await,
            Some(row) => {
                let mut merged = row_to_record(&row).map_err(|e| db_err("upsert", table, e))?;
                let id = merged
                    .get("id")
                    .cloned()
                    .unwrap_or_else(|| Value::String(Uuid::new_v4().to_string()));
                for (key, value) in record {
                    merged.insert(key, value);
                }
                // conflict target keeps its original identity
                merged.insert("id".to_string(), id.clone());
                sqlx::query(&format!("UPDATE \"{table}\" SET data = $1 WHERE id = $2"))
                    .bind(Value::Object(merged.clone()))
                    .bind(id.as_str().unwrap_or_default())
                    .execute(&self.pool)
                    .await
                    .map_err(|e| db_err("upsert", table, e))?;
                Ok(merged)
            }
        }
    }

    async fn read(
        &self,
        table: &str,
        id_value: &Value,
        id_column: &str,
    ) -> Result<Option<Record>, PersistenceError> {
        self.ensure_table(table).await?;
        validate_identifier(id_column)?;
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT data FROM \"{table}\" WHERE "));
        if id_column == "id" {
            builder.push("id = ");
            builder.push_bind(value_to_text(id_value));
        } else {
            builder.push(format!("data->>'{id_column}' IS NOT DISTINCT FROM "));
            builder.push_bind(value_to_text(id_value));
        }
        builder.push(" LIMIT 1");
        let row = builder
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err("read", table, e))?;
        row.map(|r| row_to_record(&r).map_err(|e| db_err("read", table, e)))
            .transpose()
    }

    async fn query(&self, table: &str, query: &Query) -> Result<Vec<Record>, PersistenceError> {
        self.ensure_table(table).await?;
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT data FROM \"{table}\""));

        if let Some(filters) = query.filters.as_ref().filter(|f| !f.is_empty()) {
            builder.push(" WHERE ");
            for (i, (column, value)) in filters.iter().enumerate() {
                validate_identifier(column)?;
                if i > 0 {
                    builder.push(" AND ");
                }
                match value_to_text(value) {
                    Some(text) if text.contains('%') => {
                        builder.push(format!("data->>'{column}' ILIKE "));
                        builder.push_bind(text);
                    }
                    other => {
                        builder.push(format!("data->>'{column}' IS NOT DISTINCT FROM "));
                        builder.push_bind(other);
                    }
                }
            }
        }

        if let Some(order_by) = &query.order_by {
            validate_identifier(order_by)?;
            let direction = if query.descending { "DESC" } else { "ASC" };
            builder.push(format!(" ORDER BY data->'{order_by}' {direction}"));
        }
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            builder.push(" OFFSET ");
            builder.push_bind(offset as i64);
        }

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_err("query", table, e))?;
        rows.iter()
            .map(|row| {
                row_to_record(row)
                    .map(|record| project(record, query.select.as_ref()))
                    .map_err(|e| db_err("query", table, e))
            })
            .collect()
    }

    async fn get_columns(&self, table: &str) -> Result<Vec<String>, PersistenceError> {
        self.ensure_table(table).await?;
        let rows = sqlx::query(&format!(
            "SELECT DISTINCT jsonb_object_keys(data) AS col FROM \"{table}\" ORDER BY col"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("get_columns", table, e))?;
        rows.iter()
            .map(|row| row.try_get("col").map_err(|e| db_err("get_columns", table, e)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identifier_validation() {
        assert!(validate_identifier("leads").is_ok());
        assert!(validate_identifier("staging_leads2").is_ok());
        assert!(validate_identifier("_private").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("Leads").is_err());
        assert!(validate_identifier("lead-s").is_err());
        assert!(validate_identifier("le ads").is_err());
        assert!(validate_identifier("t; DROP TABLE x").is_err());
    }

    #[test]
    fn filter_values_render_as_jsonb_text_projection() {
        assert_eq!(value_to_text(&json!("alpha")), Some("alpha".to_string()));
        assert_eq!(value_to_text(&json!(42)), Some("42".to_string()));
        assert_eq!(value_to_text(&json!(true)), Some("true".to_string()));
        assert_eq!(value_to_text(&Value::Null), None);
    }

    #[test]
    fn projection_fills_missing_columns_with_null() {
        let record: Record = json!({"id": "1", "name": "a"})
            .as_object()
            .unwrap()
            .clone();
        let select = vec!["name".to_string(), "score".to_string()];
        let projected = project(record, Some(&select));
        assert_eq!(projected.len(), 2);
        assert_eq!(projected["name"], json!("a"));
        assert_eq!(projected["score"], Value::Null);
    }
}
