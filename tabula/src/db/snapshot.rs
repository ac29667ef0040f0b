use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::catalog::{is_system_column, TableDescriptor};
use crate::db::executor::{DbError, DbPool};
use crate::db::value::{ColumnKind, Row, Value};

/// Server state of one table as of `loaded_at`.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub rows: Vec<Row>,
    pub loaded_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            loaded_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Full scan of `table`. No filtering, no paging.
pub async fn load_snapshot(db: DbPool<'_>, table: &TableDescriptor) -> Result<Snapshot, DbError> {
    let sql = format!("SELECT * FROM {}", table.name.quoted());
    let objects = db.fetch_json_all(&sql).await?;

    let mut rows = Vec::with_capacity(objects.len());
    for object in &objects {
        rows.push(row_from_json(table, object)?);
    }

    tracing::debug!(table = %table.name, rows = rows.len(), "snapshot loaded");
    Ok(Snapshot::new(rows))
}

/// Builds a typed row in the table's column order. Missing fields are null.
pub fn row_from_json(table: &TableDescriptor, object: &serde_json::Value) -> Result<Row, DbError> {
    let fields = object
        .as_object()
        .ok_or_else(|| DbError::Decode(format!("expected row object, got {}", object)))?;

    let mut row = Row::with_capacity(table.columns.len());
    for column in &table.columns {
        // Some stores hand back the system timestamps as raw epoch numbers.
        let kind = if is_system_column(&column.name) {
            ColumnKind::Timestamp
        } else {
            column.kind
        };
        let value = fields
            .get(&column.name)
            .map(|cell| Value::from_json(cell, kind))
            .unwrap_or(Value::Null);
        if kind == ColumnKind::Integer && !matches!(value, Value::Int(_) | Value::Null) {
            return Err(DbError::Decode(format!(
                "column {} expects a whole number, got {}",
                column.name,
                fields.get(&column.name).unwrap_or(&serde_json::Value::Null)
            )));
        }
        row.insert(column.name.clone(), value);
    }
    Ok(row)
}
