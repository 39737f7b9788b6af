//! The storage boundary.
//!
//! The query layer never opens connections itself. It is handed an
//! [`Executor`] that runs parameterized statements and returns rows.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use crate::dialect::Dialect;
use crate::error::Result;
use crate::value::Value;

/// A boxed future for async executor operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A result row: column name to value.
pub type Row = BTreeMap<String, Value>;

/// Runs compiled statements against a storage backend.
///
/// Executors are shared behind `Arc<dyn Executor>`; every call is an
/// independent round trip. Nothing at this layer serializes consecutive
/// calls, so multi-statement sequences are only atomic if the executor
/// itself runs on a dedicated session.
///
/// # Example
///
/// ```ignore
/// struct Recording { rows: Vec<Row> }
///
/// impl Executor for Recording {
///     fn dialect(&self) -> &dyn Dialect {
///         &GenericDialect
///     }
///
///     fn raw<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<Vec<Row>>> {
///         Box::pin(async move {
///             println!("{sql} {params:?}");
///             Ok(self.rows.clone())
///         })
///     }
/// }
/// ```
pub trait Executor: Send + Sync {
    /// Returns the dialect statements must be compiled for.
    fn dialect(&self) -> &dyn Dialect;

    /// Executes `sql` with `params` bound in order and returns all rows.
    fn raw<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<Vec<Row>>>;
}
