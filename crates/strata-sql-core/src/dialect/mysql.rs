//! MySQL dialect.

use super::Dialect;
use crate::query::LockMode;

/// MySQL dialect: positional placeholders, no RETURNING.
///
/// Inserts read the generated key back with `LAST_INSERT_ID()`, which is
/// scoped to the connection that ran the insert.
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlDialect;

impl MySqlDialect {
    /// Creates a new MySQL dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn last_insert_id_sql(&self) -> Option<&'static str> {
        Some("SELECT LAST_INSERT_ID() AS id")
    }

    fn lock_clause(&self, mode: LockMode) -> Option<&'static str> {
        match mode {
            LockMode::Update => Some("FOR UPDATE"),
            LockMode::Share => Some("LOCK IN SHARE MODE"),
        }
    }

    fn offset_without_limit(&self) -> Option<&'static str> {
        Some("18446744073709551615")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_dialect() {
        let dialect = MySqlDialect::new();
        assert_eq!(dialect.placeholder(2), "?");
        assert!(!dialect.supports_returning());
        assert_eq!(
            dialect.last_insert_id_sql(),
            Some("SELECT LAST_INSERT_ID() AS id")
        );
        assert_eq!(dialect.lock_clause(LockMode::Share), Some("LOCK IN SHARE MODE"));
    }
}
