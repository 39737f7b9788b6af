//! Error types for query building and execution.

use thiserror::Error;

/// Errors raised by the query layer.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Error reported by the storage driver.
    #[error("database error: {0}")]
    Database(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// No row matched a query that required one.
    #[error("no matching row found")]
    NotFound,

    /// The executor's dialect lacks a capability the operation needs.
    #[error("{capability} is not supported by the {dialect} dialect")]
    Unsupported {
        /// The missing capability.
        capability: &'static str,
        /// Dialect name.
        dialect: &'static str,
    },

    /// The query or its result had an unexpected shape.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl QueryError {
    /// Wraps a driver error.
    pub fn database(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Database(Box::new(err))
    }
}

/// Result type alias for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;
