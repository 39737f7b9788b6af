//! Error types for the ORM.

use strata_sql_core::QueryError;
use thiserror::Error;

/// ORM-specific errors.
#[derive(Debug, Error)]
pub enum OrmError {
    /// Error from query building or the executor.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// No record matched a lookup that required one.
    #[error("{model} not found")]
    NotFound {
        /// Model name.
        model: &'static str,
    },

    /// Neither a model-specific nor a default executor is registered.
    #[error("no executor registered for {model} and no default executor")]
    MissingExecutor {
        /// Model name.
        model: &'static str,
    },

    /// The model declares no relation with this name.
    #[error("{model} has no relation named {relation:?}")]
    UnknownRelation {
        /// Model name.
        model: &'static str,
        /// Requested relation.
        relation: String,
    },

    /// The relation kind does not support the operation.
    #[error("{operation} is not supported on {relation} relations")]
    UnsupportedRelationOperation {
        /// Relation kind.
        relation: &'static str,
        /// Attempted operation.
        operation: &'static str,
    },

    /// An attribute value could not be converted by its cast.
    #[error("cannot cast {attribute} as {cast}: {message}")]
    Cast {
        /// Attribute name.
        attribute: String,
        /// Cast name.
        cast: String,
        /// What went wrong.
        message: String,
    },

    /// A key attribute needed by the operation is unset.
    #[error("{model} is missing key attribute {key}")]
    MissingKey {
        /// Model name.
        model: &'static str,
        /// Key column.
        key: String,
    },

    /// Restore was called on a model without soft deletes.
    #[error("{model} does not use soft deletes")]
    NotSoftDeletable {
        /// Model name.
        model: &'static str,
    },
}

/// Result type alias for ORM operations.
pub type Result<T> = std::result::Result<T, OrmError>;
