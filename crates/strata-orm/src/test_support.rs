//! Helpers shared by the unit tests.

use strata_sql_core::dialect::GenericDialect;
use strata_sql_core::{BoxFuture, Dialect, Executor, Row, Value};

/// Executor that answers every statement with no rows.
pub struct NullExecutor;

impl Executor for NullExecutor {
    fn dialect(&self) -> &dyn Dialect {
        &GenericDialect
    }

    fn raw<'a>(
        &'a self,
        _sql: &'a str,
        _params: &'a [Value],
    ) -> BoxFuture<'a, strata_sql_core::Result<Vec<Row>>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}
