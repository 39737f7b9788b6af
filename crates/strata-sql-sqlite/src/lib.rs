//! # strata-sql-sqlite
//!
//! SQLite support for `strata-sql-core`.
//!
//! # How SQLite differs from other dialects
//!
//! - **[RETURNING]**: supported on INSERT, UPDATE and DELETE since SQLite
//!   3.35.0. [`SqliteDialect::legacy`] targets older builds and reads
//!   generated keys with `last_insert_rowid()` instead.
//! - **Row locks**: SQLite locks whole databases, so `lock_for_update` and
//!   `shared_lock` compile to nothing.
//! - **OFFSET**: requires a LIMIT; `LIMIT -1` means "no limit".
//! - **[Type affinity]**: values come back by storage class (INTEGER, REAL,
//!   TEXT, BLOB, NULL) regardless of declared column types. Booleans read back
//!   as integers; attribute casts restore richer types.
//!
//! [RETURNING]: https://www.sqlite.org/lang_returning.html
//! [Type affinity]: https://www.sqlite.org/datatype3.html
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata_sql_core::QueryBuilder;
//! use strata_sql_sqlite::SqliteConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = Arc::new(SqliteConfig::from_env()?.connect().await?);
//! let names = QueryBuilder::new("users", executor)
//!     .where_not_null("email")
//!     .pluck("name")
//!     .await?;
//! # let _ = names;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dialect;
pub mod executor;

pub use config::{ConfigError, SqliteConfig};
pub use dialect::SqliteDialect;
pub use executor::SqliteExecutor;
