//! Chainable access to one record's relation.

use std::fmt;

use strata_sql_core::{QueryBuilder, Row, ToValue, Value};

use super::belongs_to_many::{BelongsToMany, PivotChanges};
use super::{Relation, Relationship};
use crate::db::Database;
use crate::error::{OrmError, Result};
use crate::query::ModelQueryBuilder;
use crate::record::Record;
use crate::scopes::group_or_clauses;

/// A query over the records related to one parent.
///
/// Obtained from [`Record::related`]. Filters added here narrow the related
/// query; the relation's own constraint is added when a terminal runs.
///
/// ```ignore
/// let recent = user.related(&db, "posts")?.order_by("-posts.id").limit(3).get().await?;
/// user.related(&db, "roles")?.sync([2, 3]).await?;
/// ```
pub struct RelationQuery<'db> {
    name: String,
    parent: Record,
    relation: Relation,
    query: ModelQueryBuilder<'db>,
}

impl fmt::Debug for RelationQuery<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationQuery")
            .field("name", &self.name)
            .field("parent", &self.parent.model().name)
            .field("kind", &self.relation.kind())
            .field("query", &self.query)
            .finish()
    }
}

impl<'db> RelationQuery<'db> {
    pub(crate) fn new(db: &'db Database, parent: &Record, name: &str) -> Result<Self> {
        let relation = parent.model().relation(name)?;
        let query = db.query_for(relation.strategy().related())?;
        Ok(Self {
            name: name.to_string(),
            parent: parent.detached(),
            relation,
            query,
        })
    }

    /// Returns the relation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the relation declaration.
    #[must_use]
    pub const fn relation(&self) -> &Relation {
        &self.relation
    }

    fn strategy(&self) -> &dyn Relationship {
        self.relation.strategy()
    }

    /// Transforms the related query.
    #[must_use]
    pub fn constrain(mut self, f: impl FnOnce(QueryBuilder) -> QueryBuilder) -> Self {
        self.query = self.query.constrain(f);
        self
    }

    /// Adds `column = value` to the related query.
    #[must_use]
    pub fn where_eq<V: ToValue>(self, column: &str, value: V) -> Self {
        self.constrain(|q| q.where_eq(column, value))
    }

    /// Orders the related query.
    #[must_use]
    pub fn order_by(self, spec: &str) -> Self {
        self.constrain(|q| q.order_by(spec))
    }

    /// Limits the related query.
    #[must_use]
    pub fn limit(self, n: u64) -> Self {
        self.constrain(|q| q.limit(n))
    }

    /// Eager-loads a path on the related records.
    #[must_use]
    pub fn with(mut self, path: &str) -> Self {
        self.query = self.query.with(path);
        self
    }

    /// Includes soft-deleted related rows.
    #[must_use]
    pub fn with_trashed(mut self) -> Self {
        self.query = self.query.with_trashed();
        self
    }

    /// The related query with the relation's constraint added.
    fn resolved(&self) -> ModelQueryBuilder<'db> {
        let strategy = self.strategy();
        self.query
            .clone()
            .constrain(|base| strategy.add_constraints(group_or_clauses(base), &self.parent))
    }

    /// Compiles the related SELECT.
    #[must_use]
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        self.resolved().to_sql()
    }

    async fn run(&self, query: ModelQueryBuilder<'db>) -> Result<Vec<Record>> {
        let mut records = query.fetch().await?;
        self.strategy().prepare_children(&mut records);
        query.load_eager(&mut records).await?;
        Ok(records)
    }

    /// Loads the related records.
    pub async fn get(&self) -> Result<Vec<Record>> {
        self.run(self.resolved()).await
    }

    /// Loads the first related record.
    pub async fn first(&self) -> Result<Option<Record>> {
        let records = self.run(self.resolved().limit(1)).await?;
        Ok(records.into_iter().next())
    }

    /// Counts the related records.
    pub async fn count(&self) -> Result<i64> {
        self.resolved().count().await
    }

    /// Returns whether any related record exists.
    pub async fn exists(&self) -> Result<bool> {
        self.resolved().exists().await
    }

    /// Creates a record linked to the parent.
    ///
    /// HasOne/HasMany set the foreign key; BelongsToMany saves the record and
    /// attaches it.
    pub async fn create<I, K, V>(&self, attributes: I) -> Result<Record>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: ToValue,
    {
        let db = self.query.database();
        let mut record = Record::new(self.strategy().related());
        record.fill(attributes)?;
        match &self.relation {
            Relation::HasOne(relation) => {
                let key = self.parent_value(relation.parent_key(&self.parent))?;
                record.set_raw(relation.foreign_key(), key);
                record.save(db).await?;
            }
            Relation::HasMany(relation) => {
                let key = self.parent_value(relation.parent_key(&self.parent))?;
                record.set_raw(relation.foreign_key(), key);
                record.save(db).await?;
            }
            Relation::BelongsToMany(relation) => {
                if record.save(db).await? {
                    let id = record
                        .get_raw(relation.related_key_name())
                        .cloned()
                        .unwrap_or(Value::Null);
                    let executor = db.executor_for(self.parent.model())?;
                    relation
                        .attach(&executor, &self.parent, &[id], &Row::new())
                        .await?;
                }
            }
            Relation::BelongsTo(_) => {
                return Err(OrmError::UnsupportedRelationOperation {
                    relation: "BelongsTo",
                    operation: "create",
                });
            }
        }
        Ok(record)
    }

    fn parent_value(&self, column: &str) -> Result<Value> {
        self.parent
            .get_raw(column)
            .filter(|value| !value.is_null())
            .cloned()
            .ok_or_else(|| OrmError::MissingKey {
                model: self.parent.model().name,
                key: column.to_string(),
            })
    }

    fn pivot(&self, operation: &'static str) -> Result<&BelongsToMany> {
        match &self.relation {
            Relation::BelongsToMany(relation) => Ok(relation),
            other => Err(OrmError::UnsupportedRelationOperation {
                relation: other.kind(),
                operation,
            }),
        }
    }

    /// Links `ids` to the parent.
    pub async fn attach<I, V>(&self, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: ToValue,
    {
        self.attach_with(ids, &[]).await
    }

    /// Links `ids` to the parent, storing `extra` in every pivot row.
    pub async fn attach_with<I, V>(&self, ids: I, extra: &[(&str, Value)]) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: ToValue,
    {
        let relation = self.pivot("attach")?;
        let ids = to_values(ids);
        let extra: Row = extra
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect();
        let executor = self.query.database().executor_for(self.parent.model())?;
        relation.attach(&executor, &self.parent, &ids, &extra).await
    }

    /// Unlinks `ids` from the parent.
    pub async fn detach<I, V>(&self, ids: I) -> Result<Option<u64>>
    where
        I: IntoIterator<Item = V>,
        V: ToValue,
    {
        let relation = self.pivot("detach")?;
        let ids = to_values(ids);
        let executor = self.query.database().executor_for(self.parent.model())?;
        relation.detach(&executor, &self.parent, Some(ids.as_slice())).await
    }

    /// Unlinks everything from the parent.
    pub async fn detach_all(&self) -> Result<Option<u64>> {
        let relation = self.pivot("detach")?;
        let executor = self.query.database().executor_for(self.parent.model())?;
        relation.detach(&executor, &self.parent, None).await
    }

    /// Replaces the parent's links with exactly `ids`.
    pub async fn sync<I, V>(&self, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: ToValue,
    {
        let relation = self.pivot("sync")?;
        let ids = to_values(ids);
        let executor = self.query.database().executor_for(self.parent.model())?;
        relation.sync(&executor, &self.parent, &ids).await
    }

    /// Links the ids that are not linked and unlinks those that are.
    pub async fn toggle<I, V>(&self, ids: I) -> Result<PivotChanges>
    where
        I: IntoIterator<Item = V>,
        V: ToValue,
    {
        let relation = self.pivot("toggle")?;
        let ids = to_values(ids);
        let executor = self.query.database().executor_for(self.parent.model())?;
        relation.toggle(&executor, &self.parent, &ids).await
    }

    /// Returns the ids currently linked to the parent.
    pub async fn attached_ids(&self) -> Result<Vec<Value>> {
        let relation = self.pivot("attached_ids")?;
        let executor = self.query.database().executor_for(self.parent.model())?;
        relation.attached_ids(&executor, &self.parent).await
    }
}

fn to_values<I, V>(ids: I) -> Vec<Value>
where
    I: IntoIterator<Item = V>,
    V: ToValue,
{
    ids.into_iter().map(ToValue::to_value).collect()
}
