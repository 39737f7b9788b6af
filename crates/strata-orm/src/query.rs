//! Model-aware queries and eager loading.
//!
//! A [`ModelQueryBuilder`] wraps a [`QueryBuilder`] for one model's table and
//! adds what the plain builder does not know about: global scopes, soft
//! deletes, hydration into [`Record`]s and batched relation loading.
//!
//! Eager loading issues one query per declared relation per nesting depth,
//! regardless of how many parents are loaded. Declared relations resolve in
//! declaration order and every depth completes before the next one starts.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use strata_sql_core::{BoxFuture, Paginated, QueryBuilder, Row, ToValue, Value};
use tracing::debug;

use crate::db::Database;
use crate::error::{OrmError, Result};
use crate::model::ModelType;
use crate::record::{timestamp_value, Record, Related};
use crate::relations::Relationship;
use crate::scopes::{group_or_clauses, SOFT_DELETES};

/// A constraint applied to an eager-loaded relation query.
pub type Constraint = Arc<dyn Fn(QueryBuilder) -> QueryBuilder + Send + Sync>;

/// One declared eager load: a dotted relation path and an optional
/// constraint for its last segment.
#[derive(Clone)]
struct EagerLoad {
    path: String,
    constraint: Option<Constraint>,
}

/// A query over one model's table.
///
/// ```ignore
/// let posts = Post::query(&db)?
///     .where_eq("posts.status", "published")
///     .with("user")
///     .with_constraint("comments", |q| q.order_by("-comments.id").limit(5))
///     .latest()
///     .get()
///     .await?;
/// ```
#[derive(Clone)]
pub struct ModelQueryBuilder<'db> {
    db: &'db Database,
    model: ModelType,
    base: QueryBuilder,
    eager: Vec<EagerLoad>,
    without_all_scopes: bool,
    removed: BTreeSet<String>,
}

impl fmt::Debug for ModelQueryBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let eager: Vec<&str> = self.eager.iter().map(|load| load.path.as_str()).collect();
        f.debug_struct("ModelQueryBuilder")
            .field("model", &self.model.name)
            .field("base", &self.base)
            .field("eager", &eager)
            .field("without_all_scopes", &self.without_all_scopes)
            .field("removed_scopes", &self.removed)
            .finish()
    }
}

impl<'db> ModelQueryBuilder<'db> {
    pub(crate) fn new(db: &'db Database, model: ModelType, base: QueryBuilder) -> Self {
        Self {
            db,
            model,
            base,
            eager: Vec::new(),
            without_all_scopes: false,
            removed: BTreeSet::new(),
        }
    }

    /// Returns the queried model.
    #[must_use]
    pub const fn model(&self) -> ModelType {
        self.model
    }

    /// Returns the context this query runs in.
    #[must_use]
    pub const fn database(&self) -> &'db Database {
        self.db
    }

    /// Returns the query as built so far, without scopes.
    #[must_use]
    pub const fn base(&self) -> &QueryBuilder {
        &self.base
    }

    /// Returns the query without scopes, consuming the builder.
    #[must_use]
    pub fn into_base(self) -> QueryBuilder {
        self.base
    }

    /// Returns the query with every enabled scope applied.
    #[must_use]
    pub fn scoped(&self) -> QueryBuilder {
        if self.without_all_scopes {
            return self.base.clone();
        }
        self.db
            .scopes()
            .apply(self.model, self.base.clone(), |name| {
                !self.removed.contains(name)
            })
    }

    /// Compiles the scoped SELECT.
    #[must_use]
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        self.scoped().to_sql()
    }

    /// Transforms the underlying builder.
    #[must_use]
    pub fn constrain(mut self, f: impl FnOnce(QueryBuilder) -> QueryBuilder) -> Self {
        self.base = f(self.base);
        self
    }

    // ---------------------------------------------------------------------
    // Eager loading and scopes
    // ---------------------------------------------------------------------

    /// Eager-loads a relation path such as `"posts"` or `"posts.comments"`.
    #[must_use]
    pub fn with(self, path: &str) -> Self {
        self.push_eager(path, None)
    }

    /// Eager-loads a relation path, constraining the query of its last
    /// segment.
    #[must_use]
    pub fn with_constraint<F>(self, path: &str, constraint: F) -> Self
    where
        F: Fn(QueryBuilder) -> QueryBuilder + Send + Sync + 'static,
    {
        self.push_eager(path, Some(Arc::new(constraint)))
    }

    fn push_eager(mut self, path: &str, constraint: Option<Constraint>) -> Self {
        match self.eager.iter_mut().find(|load| load.path == path) {
            // A plain repeat of a path keeps its earlier constraint.
            Some(load) => {
                if constraint.is_some() {
                    load.constraint = constraint;
                }
            }
            None => self.eager.push(EagerLoad {
                path: path.to_string(),
                constraint,
            }),
        }
        self
    }

    /// Skips one named global scope.
    #[must_use]
    pub fn without_global_scope(mut self, name: &str) -> Self {
        self.removed.insert(name.to_string());
        self
    }

    /// Skips every global scope, soft deletes included.
    #[must_use]
    pub const fn without_global_scopes(mut self) -> Self {
        self.without_all_scopes = true;
        self
    }

    /// Includes soft-deleted rows.
    #[must_use]
    pub fn with_trashed(self) -> Self {
        self.without_global_scope(SOFT_DELETES)
    }

    /// Returns only soft-deleted rows.
    #[must_use]
    pub fn only_trashed(self) -> Self {
        let column = self.model.qualified(self.model.deleted_at);
        self.with_trashed().constrain(|q| q.where_not_null(&column))
    }

    // ---------------------------------------------------------------------
    // Builder delegation
    // ---------------------------------------------------------------------

    /// Replaces the select list.
    #[must_use]
    pub fn select(self, columns: &[&str]) -> Self {
        self.constrain(|q| q.select(columns))
    }

    /// Adds `column = value`.
    #[must_use]
    pub fn where_eq<V: ToValue>(self, column: &str, value: V) -> Self {
        self.constrain(|q| q.where_eq(column, value))
    }

    /// Adds `OR column = value`.
    #[must_use]
    pub fn or_where_eq<V: ToValue>(self, column: &str, value: V) -> Self {
        self.constrain(|q| q.or_where_eq(column, value))
    }

    /// Adds `column <op> value`.
    #[must_use]
    pub fn where_op<V: ToValue>(
        self,
        column: &str,
        op: strata_sql_core::CompareOp,
        value: V,
    ) -> Self {
        self.constrain(|q| q.where_op(column, op, value))
    }

    /// Adds `OR column <op> value`.
    #[must_use]
    pub fn or_where_op<V: ToValue>(
        self,
        column: &str,
        op: strata_sql_core::CompareOp,
        value: V,
    ) -> Self {
        self.constrain(|q| q.or_where_op(column, op, value))
    }

    /// Adds `column IN (...)`.
    #[must_use]
    pub fn where_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToValue,
    {
        self.constrain(|q| q.where_in(column, values))
    }

    /// Adds `column NOT IN (...)`.
    #[must_use]
    pub fn where_not_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToValue,
    {
        self.constrain(|q| q.where_not_in(column, values))
    }

    /// Adds `column IS NULL`.
    #[must_use]
    pub fn where_null(self, column: &str) -> Self {
        self.constrain(|q| q.where_null(column))
    }

    /// Adds `column IS NOT NULL`.
    #[must_use]
    pub fn where_not_null(self, column: &str) -> Self {
        self.constrain(|q| q.where_not_null(column))
    }

    /// Adds `column BETWEEN low AND high`.
    #[must_use]
    pub fn where_between<V: ToValue>(self, column: &str, low: V, high: V) -> Self {
        self.constrain(|q| q.where_between(column, low, high))
    }

    /// Adds a raw predicate with `?` markers for `params`.
    #[must_use]
    pub fn where_raw(self, sql: &str, params: Vec<Value>) -> Self {
        self.constrain(|q| q.where_raw(sql, params))
    }

    /// Adds a parenthesized group built by `f`.
    #[must_use]
    pub fn where_group(self, f: impl FnOnce(QueryBuilder) -> QueryBuilder) -> Self {
        self.constrain(|q| q.where_group(f))
    }

    /// Adds `OR (...)` built by `f`.
    #[must_use]
    pub fn or_where_group(self, f: impl FnOnce(QueryBuilder) -> QueryBuilder) -> Self {
        self.constrain(|q| q.or_where_group(f))
    }

    /// Adds an INNER JOIN.
    #[must_use]
    pub fn join(self, table: &str, on: &str) -> Self {
        self.constrain(|q| q.join(table, on))
    }

    /// Adds a LEFT JOIN.
    #[must_use]
    pub fn left_join(self, table: &str, on: &str) -> Self {
        self.constrain(|q| q.left_join(table, on))
    }

    /// Adds an ordering; prefix the column with `-` for descending.
    #[must_use]
    pub fn order_by(self, spec: &str) -> Self {
        self.constrain(|q| q.order_by(spec))
    }

    /// Orders newest first by the created-at column.
    #[must_use]
    pub fn latest(self) -> Self {
        let column = self.model.qualified(self.model.created_at);
        self.constrain(|q| q.latest(&column))
    }

    /// Orders oldest first by the created-at column.
    #[must_use]
    pub fn oldest(self) -> Self {
        let column = self.model.qualified(self.model.created_at);
        self.constrain(|q| q.oldest(&column))
    }

    /// Limits the number of rows.
    #[must_use]
    pub fn limit(self, n: u64) -> Self {
        self.constrain(|q| q.limit(n))
    }

    /// Skips rows.
    #[must_use]
    pub fn offset(self, n: u64) -> Self {
        self.constrain(|q| q.offset(n))
    }

    /// Selects one page (1-based).
    #[must_use]
    pub fn for_page(self, page: u64, per_page: u64) -> Self {
        self.constrain(|q| q.for_page(page, per_page))
    }

    /// Locks the selected rows for update.
    #[must_use]
    pub fn lock_for_update(self) -> Self {
        self.constrain(QueryBuilder::lock_for_update)
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Runs the scoped query and hydrates rows without eager loading.
    pub(crate) async fn fetch(&self) -> Result<Vec<Record>> {
        let rows = self.scoped().get().await?;
        Ok(Record::hydrate_all(self.model, rows))
    }

    /// Runs the declared eager loads against `records`.
    pub(crate) async fn load_eager(&self, records: &mut [Record]) -> Result<()> {
        let tree = EagerNode::build(&self.eager);
        load_nodes(self.db, records, &tree).await
    }

    /// Executes the query, then the declared eager loads.
    pub async fn get(&self) -> Result<Vec<Record>> {
        let mut records = self.fetch().await?;
        self.load_eager(&mut records).await?;
        Ok(records)
    }

    /// Returns the first matching record.
    pub async fn first(&self) -> Result<Option<Record>> {
        let records = self.clone().limit(1).get().await?;
        Ok(records.into_iter().next())
    }

    /// Returns the first matching record or `NotFound`.
    pub async fn first_or_fail(&self) -> Result<Record> {
        self.first().await?.ok_or(OrmError::NotFound {
            model: self.model.name,
        })
    }

    /// Finds a record by primary key.
    pub async fn find<V: ToValue>(&self, id: V) -> Result<Option<Record>> {
        let column = self.model.qualified(self.model.primary_key);
        self.clone().where_eq(&column, id).first().await
    }

    /// Finds a record by primary key or fails with `NotFound`.
    pub async fn find_or_fail<V: ToValue>(&self, id: V) -> Result<Record> {
        self.find(id).await?.ok_or(OrmError::NotFound {
            model: self.model.name,
        })
    }

    /// Finds every record whose primary key is in `ids`.
    pub async fn find_many<I, V>(&self, ids: I) -> Result<Vec<Record>>
    where
        I: IntoIterator<Item = V>,
        V: ToValue,
    {
        let column = self.model.qualified(self.model.primary_key);
        self.clone().where_in(&column, ids).get().await
    }

    /// Counts matching rows.
    pub async fn count(&self) -> Result<i64> {
        Ok(self.scoped().count().await?)
    }

    /// Returns whether any row matches.
    pub async fn exists(&self) -> Result<bool> {
        Ok(self.scoped().exists().await?)
    }

    /// Returns one column of every matching row, in storage form.
    pub async fn pluck(&self, column: &str) -> Result<Vec<Value>> {
        Ok(self.scoped().pluck(column).await?)
    }

    /// Returns one column of the first matching row.
    pub async fn value(&self, column: &str) -> Result<Option<Value>> {
        Ok(self.scoped().value(column).await?)
    }

    /// Returns `SUM(column)`.
    pub async fn sum(&self, column: &str) -> Result<Value> {
        Ok(self.scoped().sum(column).await?)
    }

    /// Returns `AVG(column)`.
    pub async fn avg(&self, column: &str) -> Result<Value> {
        Ok(self.scoped().avg(column).await?)
    }

    /// Returns `MIN(column)`.
    pub async fn min(&self, column: &str) -> Result<Value> {
        Ok(self.scoped().min(column).await?)
    }

    /// Returns `MAX(column)`.
    pub async fn max(&self, column: &str) -> Result<Value> {
        Ok(self.scoped().max(column).await?)
    }

    /// Fetches one page of records plus the total count.
    pub async fn paginate(&self, page: u64, per_page: u64) -> Result<Paginated<Record>> {
        let casts = self.model.cast_registry();
        let model = self.model;
        let mut page = self
            .scoped()
            .paginate(page, per_page)
            .await?
            .map(|row| Record::hydrate_with(model, Arc::clone(&casts), row));
        self.load_eager(&mut page.data).await?;
        Ok(page)
    }

    // ---------------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------------

    /// Mass-assigns `attributes` to a new record and saves it.
    ///
    /// If a hook aborts the save, the unsaved record is returned.
    pub async fn create<I, K, V>(&self, attributes: I) -> Result<Record>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: ToValue,
    {
        let mut record = Record::new(self.model);
        record.fill(attributes)?;
        record.save(self.db).await?;
        Ok(record)
    }

    /// Returns the first record matching `search`, or creates one from
    /// `search` and `values`.
    pub async fn first_or_create(
        &self,
        search: &[(&str, Value)],
        values: &[(&str, Value)],
    ) -> Result<Record> {
        if let Some(found) = self.matching(search).first().await? {
            return Ok(found);
        }
        self.create(search.iter().chain(values).map(|(key, value)| (*key, value)))
            .await
    }

    /// Updates the first record matching `search` with `values`, or creates
    /// one from both.
    pub async fn update_or_create(
        &self,
        search: &[(&str, Value)],
        values: &[(&str, Value)],
    ) -> Result<Record> {
        match self.matching(search).first().await? {
            Some(mut found) => {
                found.fill(values.iter().map(|(key, value)| (*key, value)))?;
                found.save(self.db).await?;
                Ok(found)
            }
            None => {
                self.create(search.iter().chain(values).map(|(key, value)| (*key, value)))
                    .await
            }
        }
    }

    fn matching(&self, search: &[(&str, Value)]) -> Self {
        search
            .iter()
            .fold(self.clone(), |query, (key, value)| query.where_eq(key, value))
    }

    /// Updates every matching row without loading records or running hooks.
    ///
    /// Values go through the model's casts and the updated-at column is
    /// bumped unless given.
    pub async fn update<I, K, V>(&self, attributes: I) -> Result<Option<u64>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: ToValue,
    {
        let casts = self.model.cast_registry();
        let mut row = Row::new();
        for (key, value) in attributes {
            let key = key.as_ref();
            row.insert(key.to_string(), casts.serialize(key, value.to_value())?);
        }
        if self.model.timestamps && !row.contains_key(self.model.updated_at) {
            let now = timestamp_value(&casts, self.model.updated_at, Utc::now())?;
            row.insert(self.model.updated_at.to_string(), now);
        }
        Ok(self.scoped().update(row).await?)
    }

    /// Deletes every matching row; soft-deleting models get a delete marker.
    pub async fn delete(&self) -> Result<Option<u64>> {
        if self.model.soft_deletes {
            let now = Utc::now();
            let casts = self.model.cast_registry();
            let mut row = Row::new();
            row.insert(
                self.model.deleted_at.to_string(),
                timestamp_value(&casts, self.model.deleted_at, now)?,
            );
            if self.model.timestamps {
                row.insert(
                    self.model.updated_at.to_string(),
                    timestamp_value(&casts, self.model.updated_at, now)?,
                );
            }
            return Ok(self.scoped().update(row).await?);
        }
        Ok(self.scoped().delete().await?)
    }

    /// Removes every matching row, even on soft-deleting models.
    pub async fn force_delete(&self) -> Result<Option<u64>> {
        Ok(self.scoped().delete().await?)
    }

    /// Clears the delete marker of every matching row.
    pub async fn restore(&self) -> Result<Option<u64>> {
        if !self.model.soft_deletes {
            return Err(OrmError::NotSoftDeletable {
                model: self.model.name,
            });
        }
        self.clone()
            .with_trashed()
            .update([(self.model.deleted_at, Value::Null)])
            .await
    }
}

/// Eager-loads `paths` onto already loaded records.
///
/// All records must belong to the same model.
pub async fn load_relations(db: &Database, records: &mut [Record], paths: &[&str]) -> Result<()> {
    let loads: Vec<EagerLoad> = paths
        .iter()
        .map(|path| EagerLoad {
            path: (*path).to_string(),
            constraint: None,
        })
        .collect();
    load_nodes(db, records, &EagerNode::build(&loads)).await
}

/// Declared eager loads folded into a tree of relation names.
struct EagerNode {
    name: String,
    constraint: Option<Constraint>,
    children: Vec<EagerNode>,
}

impl EagerNode {
    fn build(loads: &[EagerLoad]) -> Vec<Self> {
        let mut roots: Vec<Self> = Vec::new();
        for load in loads {
            let segments: Vec<&str> = load.path.split('.').collect();
            let mut level = &mut roots;
            for (depth, segment) in segments.iter().enumerate() {
                let index = match level.iter().position(|node| node.name == *segment) {
                    Some(index) => index,
                    None => {
                        level.push(Self {
                            name: (*segment).to_string(),
                            constraint: None,
                            children: Vec::new(),
                        });
                        level.len() - 1
                    }
                };
                let node = &mut level[index];
                if depth + 1 == segments.len() && load.constraint.is_some() {
                    node.constraint.clone_from(&load.constraint);
                }
                level = &mut node.children;
            }
        }
        roots
    }
}

/// Where a parent's loaded relation went while its children were flattened.
enum Slot {
    Many(usize),
    One(bool),
}

fn load_nodes<'a>(
    db: &'a Database,
    parents: &'a mut [Record],
    nodes: &'a [EagerNode],
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        for node in nodes {
            load_node(db, parents, node).await?;
        }
        Ok(())
    })
}

async fn load_node(db: &Database, parents: &mut [Record], node: &EagerNode) -> Result<()> {
    let Some(first) = parents.first() else {
        return Ok(());
    };
    let model = first.model();
    let relation = model.relation(&node.name)?;
    let strategy = relation.strategy();

    let children = fetch_children(db, strategy, parents, node.constraint.as_ref()).await?;
    debug!(
        model = model.name,
        relation = %node.name,
        kind = strategy.kind(),
        parents = parents.len(),
        children = children.len(),
        "eager loaded relation"
    );
    strategy.match_eager(&node.name, parents, children);

    if node.children.is_empty() {
        return Ok(());
    }

    let mut slots = Vec::with_capacity(parents.len());
    let mut flat = Vec::new();
    for parent in parents.iter_mut() {
        match parent.unset_relation(&node.name) {
            Some(Related::Many(records)) => {
                slots.push(Slot::Many(records.len()));
                flat.extend(records);
            }
            Some(Related::One(Some(record))) => {
                slots.push(Slot::One(true));
                flat.push(*record);
            }
            Some(Related::One(None)) | None => slots.push(Slot::One(false)),
        }
    }

    let nested = load_nodes(db, &mut flat, &node.children).await;

    let mut flat = flat.into_iter();
    for (parent, slot) in parents.iter_mut().zip(slots) {
        let related = match slot {
            Slot::Many(count) => Related::Many(flat.by_ref().take(count).collect()),
            Slot::One(true) => Related::One(flat.next().map(Box::new)),
            Slot::One(false) => Related::One(None),
        };
        parent.set_relation(node.name.as_str(), related);
    }
    nested
}

/// Runs the batched query for one relation over a parent set.
async fn fetch_children(
    db: &Database,
    strategy: &dyn Relationship,
    parents: &[Record],
    constraint: Option<&Constraint>,
) -> Result<Vec<Record>> {
    let related = strategy.related();
    let mut base = db.base_query(related)?;
    if let Some(constraint) = constraint {
        base = constraint(base);
    }
    let base = strategy.add_eager_constraints(group_or_clauses(base), parents);
    let mut children = ModelQueryBuilder::new(db, related, base).fetch().await?;
    strategy.prepare_children(&mut children);
    Ok(children)
}
