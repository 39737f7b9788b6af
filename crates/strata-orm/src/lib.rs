//! # strata-orm
//!
//! An active-record ORM on top of `strata-sql-core`.
//!
//! This crate provides:
//! - `Model` for describing a table, and `Record` for one of its rows
//! - `ModelQueryBuilder` for scoped, hydrating queries with eager loading
//! - `HasOne`, `HasMany`, `BelongsTo` and `BelongsToMany` relations
//! - Attribute casts, global scopes and lifecycle hooks
//!
//! Nothing is global: executors, scopes and hooks live in a [`Database`]
//! that every operation receives explicitly.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use strata_orm::{attributes, Database, HasMany, Model, ModelExt, Relation};
//! use strata_sql_sqlite::SqliteConfig;
//!
//! struct User;
//!
//! impl Model for User {
//!     const NAME: &'static str = "User";
//!     const TABLE: &'static str = "users";
//!
//!     fn fillable() -> &'static [&'static str] {
//!         &["name", "email"]
//!     }
//!
//!     fn relation(name: &str) -> Option<Relation> {
//!         match name {
//!             "posts" => Some(HasMany::new::<Post>("user_id").into()),
//!             _ => None,
//!         }
//!     }
//! }
//!
//! async fn example() -> strata_orm::Result<()> {
//!     let executor = SqliteConfig::default().connect().await?;
//!     let db = Database::new(Arc::new(executor));
//!
//!     let mut john = User::create(&db, attributes! { "name" => "John" }).await?;
//!     john.set("email", "john@example.com")?;
//!     john.save(&db).await?;
//!
//!     // One query for the users, one for all of their posts.
//!     let users = User::query(&db)?.with("posts").get().await?;
//!     for user in &users {
//!         println!("{} has {} posts", user.get("name")?, user.related_many("posts").len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Sessions
//!
//! Each executor call is an independent round trip. Inserts on dialects
//! without RETURNING (insert, read generated key, re-select) and the pivot
//! `sync`/`toggle` operations span several statements and are only coherent
//! when nothing else writes on the same session in between. Give such
//! executors a dedicated connection.

mod casts;
mod db;
mod error;
mod hooks;
mod model;
mod persistence;
mod query;
mod record;
pub mod relations;
mod scopes;
#[cfg(test)]
mod test_support;

pub use casts::{Cast, CastFn, CastRegistry};
pub use db::Database;
pub use error::{OrmError, Result};
pub use hooks::{HookEvent, HookFn, HookRegistry};
pub use model::{Model, ModelExt, ModelType};
pub use query::{load_relations, Constraint, ModelQueryBuilder};
pub use record::{Record, Related};
pub use relations::{
    BelongsTo, BelongsToMany, HasMany, HasOne, PivotChanges, Relation, RelationQuery,
    Relationship,
};
pub use scopes::{ScopeFn, ScopeRegistry, SOFT_DELETES};

// Re-export commonly used types from strata-sql-core
pub use strata_sql_core::{
    CompareOp, Paginated, QueryBuilder, Row, ToValue, Value, DATETIME_FORMAT,
};

/// Attribute list for `create`, `fill` and friends.
pub type Attributes<'a> = Vec<(&'a str, Value)>;

/// Builds an [`Attributes`] list.
///
/// ```
/// use strata_orm::{attributes, Value};
///
/// let attrs = attributes! { "name" => "John", "age" => 30 };
/// assert_eq!(attrs[1], ("age", Value::Int(30)));
/// ```
#[macro_export]
macro_rules! attributes {
    () => {
        $crate::Attributes::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {
        vec![$(($key, $crate::ToValue::to_value($value))),+]
    };
}
