//! The ORM context: executors, hooks and scopes.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use strata_sql_core::{Executor, QueryBuilder};

use crate::error::{OrmError, Result};
use crate::hooks::HookRegistry;
use crate::model::{Model, ModelType};
use crate::query::ModelQueryBuilder;
use crate::scopes::ScopeRegistry;

/// Everything a model operation needs besides the model itself.
///
/// A `Database` is passed explicitly to every query and persistence call.
/// Cloning is cheap for the executors and copies the registries.
///
/// ```ignore
/// let executor = SqliteConfig::from_env()?.connect().await?;
/// let mut db = Database::new(Arc::new(executor));
/// db.scopes_mut().register::<Post, _>("published", |q| q.where_not_null("posts.published_at"));
/// let posts = Post::query(&db)?.with("user").get().await?;
/// ```
#[derive(Clone, Default)]
pub struct Database {
    default: Option<Arc<dyn Executor>>,
    executors: HashMap<TypeId, Arc<dyn Executor>>,
    hooks: HookRegistry,
    scopes: ScopeRegistry,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field(
                "default",
                &self.default.as_ref().map(|exec| exec.dialect().name()),
            )
            .field("overrides", &self.executors.len())
            .field("hooks", &self.hooks)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl Database {
    /// Creates a context with a default executor.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            default: Some(executor),
            ..Self::default()
        }
    }

    /// Routes queries for `M` to `executor`.
    #[must_use]
    pub fn with_executor<M: Model>(mut self, executor: Arc<dyn Executor>) -> Self {
        self.register_executor::<M>(executor);
        self
    }

    /// Routes queries for `M` to `executor`.
    pub fn register_executor<M: Model>(&mut self, executor: Arc<dyn Executor>) {
        self.executors.insert(TypeId::of::<M>(), executor);
    }

    /// Returns the executor serving `model`.
    pub fn executor_for(&self, model: ModelType) -> Result<Arc<dyn Executor>> {
        self.executors
            .get(&model.id())
            .or(self.default.as_ref())
            .cloned()
            .ok_or(OrmError::MissingExecutor { model: model.name })
    }

    /// Returns the hook registry.
    #[must_use]
    pub const fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Returns the hook registry for registration.
    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    /// Returns the scope registry.
    #[must_use]
    pub const fn scopes(&self) -> &ScopeRegistry {
        &self.scopes
    }

    /// Returns the scope registry for registration.
    pub fn scopes_mut(&mut self) -> &mut ScopeRegistry {
        &mut self.scopes
    }

    /// Starts a model query for `M`.
    pub fn query<M: Model>(&self) -> Result<ModelQueryBuilder<'_>> {
        self.query_for(ModelType::of::<M>())
    }

    /// Starts a model query for a runtime model token.
    pub fn query_for(&self, model: ModelType) -> Result<ModelQueryBuilder<'_>> {
        Ok(ModelQueryBuilder::new(self, model, self.base_query(model)?))
    }

    /// Unscoped builder over the model's table on its executor.
    pub(crate) fn base_query(&self, model: ModelType) -> Result<QueryBuilder> {
        let executor = self.executor_for(model)?;
        Ok(QueryBuilder::new(model.table, executor).with_primary_key(model.primary_key))
    }

    /// Plain builder over any table on the default executor.
    pub fn table(&self, name: &str) -> Result<QueryBuilder> {
        let executor = self
            .default
            .clone()
            .ok_or(OrmError::MissingExecutor { model: "<default>" })?;
        Ok(QueryBuilder::new(name, executor))
    }
}
