//! # strata-sql-core
//!
//! Dialect-aware query building for the strata ORM.
//!
//! This crate provides:
//! - [`QueryState`], a plain description of a pending query
//! - [`compile`], a pure function from `(dialect, state, operation)` to SQL
//!   text plus parameters
//! - [`QueryBuilder`], a fluent builder bound to an [`Executor`]
//!
//! Values are never spliced into SQL text. Every value becomes a
//! placeholder in the dialect's style and is returned alongside the SQL.
//!
//! ```rust
//! use strata_sql_core::dialect::PostgresDialect;
//! use strata_sql_core::query::{compile, Condition, CompareOp, Combinator, Operation, QueryState, WhereClause};
//! use strata_sql_core::Value;
//!
//! let mut state = QueryState::new("users");
//! state.wheres.push(WhereClause::Basic {
//!     combinator: Combinator::And,
//!     column: "name".into(),
//!     condition: Condition::Compare(CompareOp::Eq, Value::Text("'; DROP TABLE users; --".into())),
//! });
//!
//! let (sql, params) = compile(&PostgresDialect, &state, Operation::Select);
//! assert_eq!(sql, "SELECT * FROM users WHERE name = $1");
//! assert_eq!(params.len(), 1);
//! ```

pub mod dialect;
pub mod error;
pub mod executor;
pub mod pagination;
pub mod query;
pub mod value;

pub use dialect::Dialect;
pub use error::{QueryError, Result};
pub use executor::{BoxFuture, Executor, Row};
pub use pagination::Paginated;
pub use query::{compile, Aggregate, CompareOp, Operation, OrderClause, QueryBuilder, QueryState};
pub use value::{format_datetime, GroupKey, ToValue, Value, DATETIME_FORMAT};
