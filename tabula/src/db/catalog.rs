use std::fmt;

use serde::Serialize;
use sqlx::FromRow;

use crate::db::executor::{DbError, DbPool};
use crate::db::value::{quote_ident, ColumnKind};

pub const CREATED_AT: &str = "CreatedAt";
pub const UPDATED_AT: &str = "UpdatedAt";

/// Store-managed timestamp columns. Never editable, never sent in a change set.
pub const SYSTEM_COLUMNS: [&str; 2] = [CREATED_AT, UPDATED_AT];

pub fn is_system_column(name: &str) -> bool {
    SYSTEM_COLUMNS.contains(&name)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TableName {
    pub catalog: String,
    pub schema: String,
    pub table: String,
}

impl TableName {
    pub fn new(catalog: &str, schema: &str, table: &str) -> Self {
        Self {
            catalog: catalog.to_string(),
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }

    /// Quoted three-part reference for use in SQL text.
    pub fn quoted(&self) -> String {
        format!(
            "{}.{}.{}",
            quote_ident(&self.catalog),
            quote_ident(&self.schema),
            quote_ident(&self.table)
        )
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.catalog, self.schema, self.table)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub kind: ColumnKind,
    /// Type expression usable in a CAST, e.g. `"pg_catalog"."int4"`.
    #[serde(skip)]
    pub sql_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableDescriptor {
    pub name: TableName,
    pub columns: Vec<ColumnInfo>,
    pub primary_keys: Vec<String>,
}

impl TableDescriptor {
    /// Tables without a primary key can be viewed but not edited.
    pub fn is_editable(&self) -> bool {
        !self.primary_keys.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_keys.iter().any(|pk| pk == name)
    }

    /// Columns the user supplies: everything but the system timestamps.
    pub fn source_columns(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter().filter(|c| !is_system_column(&c.name))
    }
}

#[derive(Debug, FromRow)]
struct TableRow {
    table_name: String,
}

#[derive(Debug, FromRow)]
struct KeyColumnRow {
    column_name: String,
}

#[derive(Debug, FromRow)]
struct ColumnRow {
    column_name: String,
    udt_schema: String,
    udt_name: String,
    nullable: bool,
}

const LIST_TABLES_SQL: &str = "\
SELECT table_name::text AS table_name
FROM information_schema.tables
WHERE table_catalog::text = $1
  AND table_schema::text = $2
  AND table_type::text = 'BASE TABLE'
ORDER BY table_name";

const PRIMARY_KEY_SQL: &str = "\
SELECT kcu.column_name::text AS column_name
FROM information_schema.table_constraints tc
JOIN information_schema.key_column_usage kcu
  ON kcu.constraint_name = tc.constraint_name
 AND kcu.constraint_schema = tc.constraint_schema
 AND kcu.table_schema = tc.table_schema
 AND kcu.table_name = tc.table_name
WHERE tc.constraint_type::text = 'PRIMARY KEY'
  AND tc.table_catalog::text = $1
  AND tc.table_schema::text = $2
  AND tc.table_name::text = $3
ORDER BY kcu.ordinal_position";

const COLUMNS_SQL: &str = "\
SELECT column_name::text AS column_name,
       udt_schema::text AS udt_schema,
       udt_name::text AS udt_name,
       (is_nullable::text = 'YES') AS nullable
FROM information_schema.columns
WHERE table_catalog::text = $1
  AND table_schema::text = $2
  AND table_name::text = $3
ORDER BY ordinal_position";

pub async fn list_tables(
    db: DbPool<'_>,
    catalog: &str,
    schema: &str,
) -> Result<Vec<TableName>, DbError> {
    let rows: Vec<TableRow> = db
        .fetch_all(sqlx::query_as(LIST_TABLES_SQL).bind(catalog).bind(schema))
        .await?;
    Ok(rows
        .into_iter()
        .map(|r| TableName::new(catalog, schema, &r.table_name))
        .collect())
}

/// Returns the primary-key columns in key order. An empty list means the
/// table has no primary key; that is not an error.
pub async fn primary_key_columns(
    db: DbPool<'_>,
    catalog: &str,
    schema: &str,
    table: &str,
) -> Result<Vec<String>, DbError> {
    let rows: Vec<KeyColumnRow> = db
        .fetch_all(
            sqlx::query_as(PRIMARY_KEY_SQL)
                .bind(catalog)
                .bind(schema)
                .bind(table),
        )
        .await?;

    let mut keys: Vec<String> = Vec::with_capacity(rows.len());
    for row in rows {
        if !keys.contains(&row.column_name) {
            keys.push(row.column_name);
        }
    }
    Ok(keys)
}

pub async fn describe_table(db: DbPool<'_>, name: &TableName) -> Result<TableDescriptor, DbError> {
    let rows: Vec<ColumnRow> = db
        .fetch_all(
            sqlx::query_as(COLUMNS_SQL)
                .bind(&name.catalog)
                .bind(&name.schema)
                .bind(&name.table),
        )
        .await?;

    if rows.is_empty() {
        return Err(DbError::DoesNotExist);
    }

    let columns = rows
        .into_iter()
        .map(|r| ColumnInfo {
            kind: ColumnKind::from_udt_name(&r.udt_name),
            sql_type: format!("{}.{}", quote_ident(&r.udt_schema), quote_ident(&r.udt_name)),
            name: r.column_name,
            nullable: r.nullable,
        })
        .collect();

    let primary_keys = primary_key_columns(db, &name.catalog, &name.schema, &name.table).await?;

    Ok(TableDescriptor {
        name: name.clone(),
        columns,
        primary_keys,
    })
}
