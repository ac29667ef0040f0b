use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::QueryAs;
use sqlx::{self, PgPool, Postgres};
use std::fmt;

use thiserror::Error;
use tracing;

pub type PgQueryAs<'q, M> = QueryAs<'q, Postgres, M, PgArguments>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityKind {
    Unique,
    ForeignKey,
    Check,
    NotNull,
    Exclusion,
}

impl fmt::Display for IntegrityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IntegrityKind::Unique => "unique",
            IntegrityKind::ForeignKey => "foreign key",
            IntegrityKind::Check => "check",
            IntegrityKind::NotNull => "not-null",
            IntegrityKind::Exclusion => "exclusion",
        })
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("{kind} violation{}: {source}", on_constraint(.constraint))]
    Integrity {
        kind: IntegrityKind,
        constraint: Option<String>,
        #[source]
        source: sqlx::Error,
    },
    #[error("record not found")]
    DoesNotExist,
    #[error("temporary database failure: {0}")]
    Temporary(sqlx::Error),
    #[error("unexpected result shape: {0}")]
    Decode(String),
    #[error("{0}")]
    Fatal(sqlx::Error),
}

fn on_constraint(constraint: &Option<String>) -> String {
    constraint
        .as_deref()
        .map(|c| format!(" on {}", c))
        .unwrap_or_default()
}

impl DbError {
    pub const fn code(&self) -> &'static str {
        match self {
            DbError::Integrity { .. } => "integrity_violation",
            DbError::DoesNotExist => "not_found",
            DbError::Temporary(_) => "temporary_error",
            DbError::Decode(_) => "decode_error",
            DbError::Fatal(_) => "fatal_error",
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => DbError::DoesNotExist,
            sqlx::Error::Database(db) => {
                let kind = match db.code().as_deref() {
                    Some("23505") => IntegrityKind::Unique,
                    Some("23503") => IntegrityKind::ForeignKey,
                    Some("23514") => IntegrityKind::Check,
                    Some("23502") => IntegrityKind::NotNull,
                    Some("23P01") => IntegrityKind::Exclusion,
                    _ => return DbError::Fatal(e),
                };
                DbError::Integrity {
                    kind,
                    constraint: db.constraint().map(|s| s.to_owned()),
                    source: e,
                }
            }
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => {
                DbError::Temporary(e)
            }
            _ => DbError::Fatal(e),
        }
    }
}

pub struct DbTransaction {
    transaction: sqlx::Transaction<'static, Postgres>,
}

impl DbTransaction {
    pub async fn commit(self) -> Result<(), DbError> {
        self.transaction.commit().await.map_err(DbError::from)
    }

    /// Runs one statement inside the transaction, returning rows affected.
    pub async fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        let res = sqlx::query(sql)
            .execute(&mut *self.transaction)
            .await
            .map_err(DbError::from)?;
        Ok(res.rows_affected())
    }
}

#[derive(Clone, Copy)]
pub struct DbPool<'a> {
    pool: &'a PgPool,
}

impl<'a> DbPool<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn begin(&self) -> Result<DbTransaction, DbError> {
        let tx = self.pool.begin().await.map_err(DbError::from)?;
        Ok(DbTransaction { transaction: tx })
    }

    pub async fn fetch_all<M>(&self, query: PgQueryAs<'_, M>) -> Result<Vec<M>, DbError>
    where
        M: for<'r> sqlx::FromRow<'r, PgRow> + Send + Unpin,
    {
        query.fetch_all(self.pool).await.map_err(DbError::from)
    }

    /// Reads a whole result set, one JSON object per row.
    pub async fn fetch_json_all(&self, sql: &str) -> Result<Vec<serde_json::Value>, DbError> {
        jsql_all(self.pool, sql).await
    }
}

/// Wraps `sql` in a JSON aggregate so every row arrives as one object,
/// whatever the column types are.
async fn jsql_all<'e, E>(executor: E, sql: &str) -> Result<Vec<serde_json::Value>, DbError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let sql_src = sql.trim().trim_end_matches(';');
    let wrapped_query = format!(
        "SELECT COALESCE(JSON_AGG(jql), '[]'::json) FROM ({}) jql",
        sql_src
    );

    let result: serde_json::Value = sqlx::query_scalar(&wrapped_query)
        .fetch_one(executor)
        .await
        .map_err(DbError::from)?;

    match result {
        serde_json::Value::Array(rows) => Ok(rows),
        other => {
            tracing::error!("JSON aggregate returned a non-array value");
            Err(DbError::Decode(format!("expected array, got {}", other)))
        }
    }
}
