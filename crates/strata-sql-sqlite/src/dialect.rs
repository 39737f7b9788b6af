//! SQLite dialect implementation.

use strata_sql_core::dialect::Dialect;
use strata_sql_core::query::LockMode;

/// SQLite dialect.
///
/// SQLite has no row locks, so locking reads compile without a lock clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqliteDialect {
    returning: bool,
}

impl Default for SqliteDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl SqliteDialect {
    /// Creates the dialect for SQLite 3.35.0+, which supports RETURNING.
    #[must_use]
    pub const fn new() -> Self {
        Self { returning: true }
    }

    /// Creates the dialect for older SQLite builds without RETURNING.
    ///
    /// Inserts then read the generated key with `last_insert_rowid()`.
    #[must_use]
    pub const fn legacy() -> Self {
        Self { returning: false }
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn supports_returning(&self) -> bool {
        self.returning
    }

    fn last_insert_id_sql(&self) -> Option<&'static str> {
        Some("SELECT last_insert_rowid() AS id")
    }

    fn lock_clause(&self, _mode: LockMode) -> Option<&'static str> {
        None
    }

    fn offset_without_limit(&self) -> Option<&'static str> {
        Some("-1")
    }
}
