//! PostgreSQL dialect.

use super::Dialect;

/// PostgreSQL dialect: numbered placeholders and RETURNING support.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Creates a new PostgreSQL dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn supports_returning(&self) -> bool {
        true
    }

    fn last_insert_id_sql(&self) -> Option<&'static str> {
        Some("SELECT lastval() AS id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_dialect() {
        let dialect = PostgresDialect::new();
        assert_eq!(dialect.name(), "postgres");
        assert_eq!(dialect.placeholder(1), "$1");
        assert_eq!(dialect.placeholder(12), "$12");
        assert!(dialect.supports_returning());
    }
}
