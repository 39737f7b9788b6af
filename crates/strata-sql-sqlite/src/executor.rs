//! `sqlx`-backed executor.

use sqlx::sqlite::{SqliteArguments, SqlitePool, SqliteRow};
use sqlx::{Column, Row as _, Sqlite, TypeInfo, ValueRef};
use tracing::debug;

use strata_sql_core::dialect::Dialect;
use strata_sql_core::executor::{BoxFuture, Executor, Row};
use strata_sql_core::{QueryError, Result, Value};

use crate::dialect::SqliteDialect;

/// Runs compiled statements on a SQLite pool.
///
/// Every call checks a connection out of the pool independently. Multi-step
/// sequences (the legacy insert path, pivot `sync`) need a pool with a single
/// connection to see a consistent session.
#[derive(Debug, Clone)]
pub struct SqliteExecutor {
    pool: SqlitePool,
    dialect: SqliteDialect,
}

impl SqliteExecutor {
    /// Wraps a pool using the RETURNING-capable dialect.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self::with_dialect(pool, SqliteDialect::new())
    }

    /// Wraps a pool with an explicit dialect.
    #[must_use]
    pub const fn with_dialect(pool: SqlitePool, dialect: SqliteDialect) -> Self {
        Self { pool, dialect }
    }

    /// Returns the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Executes one or more `;`-separated statements without parameters.
    ///
    /// Used for schema setup; results are discarded.
    pub async fn execute_script(&self, sql: &str) -> Result<()> {
        debug!(bytes = sql.len(), "executing script");
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .map_err(QueryError::database)?;
        Ok(())
    }

    async fn fetch(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        debug!(sql = %sql, params = params.len(), "executing statement");
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param.clone());
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(QueryError::database)?;
        rows.iter().map(decode_row).collect()
    }
}

impl Executor for SqliteExecutor {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn raw<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<Vec<Row>>> {
        Box::pin(self.fetch(sql, params))
    }
}

/// Binds a value to a raw query.
fn bind_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    value: Value,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match value.into_storage() {
        Value::Null => query.bind(Option::<i64>::None),
        Value::Bool(b) => query.bind(b),
        Value::Int(i) => query.bind(i),
        Value::Float(f) => query.bind(f),
        Value::Text(s) => query.bind(s),
        Value::Blob(b) => query.bind(b),
        // into_storage lowers these to text
        other @ (Value::Json(_) | Value::Date(_) | Value::DateTime(_)) => {
            query.bind(other.to_json().to_string())
        }
    }
}

/// Decodes a row by the storage class of each value.
fn decode_row(row: &SqliteRow) -> Result<Row> {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index).map_err(QueryError::database)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_ascii_uppercase();
            match type_name.as_str() {
                "INTEGER" | "BOOLEAN" | "INT" | "BIGINT" => {
                    Value::Int(row.try_get_unchecked(index).map_err(QueryError::database)?)
                }
                "REAL" | "FLOAT" | "DOUBLE" => {
                    Value::Float(row.try_get_unchecked(index).map_err(QueryError::database)?)
                }
                "NUMERIC" => {
                    let number: f64 = row.try_get_unchecked(index).map_err(QueryError::database)?;
                    integral(number)
                }
                "BLOB" => {
                    Value::Blob(row.try_get_unchecked(index).map_err(QueryError::database)?)
                }
                _ => Value::Text(row.try_get_unchecked(index).map_err(QueryError::database)?),
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

#[allow(clippy::cast_possible_truncation)]
fn integral(number: f64) -> Value {
    if number.fract() == 0.0 && number.abs() < 9.0e15 {
        Value::Int(number as i64)
    } else {
        Value::Float(number)
    }
}
