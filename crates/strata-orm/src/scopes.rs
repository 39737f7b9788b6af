//! Global query scopes.
//!
//! A scope is a named query mutator applied to every query built for its
//! model at terminal time. Soft-deleting models get the built-in
//! [`SOFT_DELETES`] scope without registering anything.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use strata_sql_core::query::{Combinator, WhereClause};
use strata_sql_core::QueryBuilder;

use crate::model::{Model, ModelType};

/// Name of the built-in scope hiding soft-deleted rows.
pub const SOFT_DELETES: &str = "soft_deletes";

/// A registered scope.
pub type ScopeFn = Arc<dyn Fn(QueryBuilder) -> QueryBuilder + Send + Sync>;

/// Named scopes per model, applied in registration order.
#[derive(Clone, Default)]
pub struct ScopeRegistry {
    scopes: HashMap<TypeId, Vec<(String, ScopeFn)>>,
}

impl fmt::Debug for ScopeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .scopes
            .values()
            .flatten()
            .map(|(name, _)| name.as_str())
            .collect();
        f.debug_struct("ScopeRegistry").field("scopes", &names).finish()
    }
}

impl ScopeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a named scope for `M`.
    ///
    /// ```ignore
    /// scopes.register::<Post, _>("published", |q| q.where_not_null("posts.published_at"));
    /// ```
    pub fn register<M, F>(&mut self, name: &str, scope: F)
    where
        M: Model,
        F: Fn(QueryBuilder) -> QueryBuilder + Send + Sync + 'static,
    {
        let entries = self.scopes.entry(TypeId::of::<M>()).or_default();
        let scope: ScopeFn = Arc::new(scope);
        match entries.iter_mut().find(|(existing, _)| existing == name) {
            Some(entry) => entry.1 = scope,
            None => entries.push((name.to_string(), scope)),
        }
    }

    /// Removes a named scope from `M`. Returns whether it was registered.
    pub fn remove<M: Model>(&mut self, name: &str) -> bool {
        let Some(entries) = self.scopes.get_mut(&TypeId::of::<M>()) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(existing, _)| existing != name);
        entries.len() != before
    }

    /// Returns the scope names that apply to `model`, built-ins first.
    #[must_use]
    pub fn names(&self, model: ModelType) -> Vec<&str> {
        let mut names = Vec::new();
        if model.soft_deletes {
            names.push(SOFT_DELETES);
        }
        if let Some(entries) = self.scopes.get(&model.id()) {
            names.extend(entries.iter().map(|(name, _)| name.as_str()));
        }
        names
    }

    /// Applies every scope of `model` for which `enabled` returns true.
    ///
    /// Caller clauses joined with OR are grouped first, so a scope's
    /// constraints always narrow the whole caller filter.
    pub fn apply(
        &self,
        model: ModelType,
        query: QueryBuilder,
        enabled: impl Fn(&str) -> bool,
    ) -> QueryBuilder {
        let soft = model.soft_deletes && enabled(SOFT_DELETES);
        let registered: Vec<&ScopeFn> = self
            .scopes
            .get(&model.id())
            .into_iter()
            .flatten()
            .filter(|(name, _)| enabled(name))
            .map(|(_, scope)| scope)
            .collect();
        if !soft && registered.is_empty() {
            return query;
        }

        let mut query = group_or_clauses(query);
        if soft {
            query = query.where_null(&model.qualified(model.deleted_at));
        }
        for scope in registered {
            query = scope(query);
        }
        query
    }
}

/// Wraps the WHERE list in one nested group when it contains an OR.
pub(crate) fn group_or_clauses(mut query: QueryBuilder) -> QueryBuilder {
    let wheres = &mut query.state_mut().wheres;
    if wheres.iter().any(|clause| clause.combinator() == Combinator::Or) {
        let clauses = std::mem::take(wheres);
        wheres.push(WhereClause::Nested {
            combinator: Combinator::And,
            clauses,
        });
    }
    query
}
