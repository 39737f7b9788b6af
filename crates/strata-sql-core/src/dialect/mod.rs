//! SQL Dialect support.
//!
//! Different databases have slightly different SQL syntax. This module provides
//! a trait for the dialect-specific behavior the compiler and the query builder
//! depend on: placeholder style, value-returning writes, generated-key lookup
//! and row locking.

mod generic;
mod mysql;
mod postgres;

pub use generic::GenericDialect;
pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;

use crate::query::LockMode;

/// Trait for SQL dialect-specific behavior.
pub trait Dialect: Send + Sync {
    /// Returns the name of the dialect.
    fn name(&self) -> &'static str;

    /// Returns the placeholder for the `index`-th parameter (1-based).
    fn placeholder(&self, index: usize) -> String {
        let _ = index;
        String::from("?")
    }

    /// Returns whether the dialect supports a RETURNING clause on writes.
    fn supports_returning(&self) -> bool {
        false
    }

    /// Returns the statement that reads the key generated by the last insert
    /// on the current session, aliased as `id`.
    fn last_insert_id_sql(&self) -> Option<&'static str> {
        None
    }

    /// Returns the trailing clause for a locking read.
    fn lock_clause(&self, mode: LockMode) -> Option<&'static str> {
        match mode {
            LockMode::Update => Some("FOR UPDATE"),
            LockMode::Share => Some("FOR SHARE"),
        }
    }

    /// Returns the LIMIT value to emit when only an OFFSET was requested.
    ///
    /// `None` means the dialect accepts a bare OFFSET.
    fn offset_without_limit(&self) -> Option<&'static str> {
        None
    }
}
