//! Query description, compilation and execution.

pub mod aggregates;
pub mod builder;
pub mod compiler;
pub mod state;

pub use aggregates::{Aggregate, AggregateFn};
pub use builder::QueryBuilder;
pub use compiler::{compile, Operation, AGGREGATE_ALIAS};
pub use state::{
    Combinator, CompareOp, Condition, Having, JoinClause, JoinKind, LockMode, OrderClause,
    OrderDirection, QueryState, WhereClause,
};
