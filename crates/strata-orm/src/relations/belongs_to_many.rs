//! BelongsToMany: rows linked through a pivot table.
//!
//! The related query selects the related columns plus the pivot's key
//! columns (and any extra pivot columns) under a `pivot_` prefix; children
//! have those moved into [`Record::pivot`] before they are matched or
//! handed out.

use std::collections::HashSet;
use std::sync::Arc;

use strata_sql_core::{Executor, QueryBuilder, Row, Value};
use tracing::debug;

use super::{collect_keys, group_by, where_key, Relationship};
use crate::error::{OrmError, Result};
use crate::model::{Model, ModelType};
use crate::record::{Record, Related, PIVOT_PREFIX};

/// Ids attached and detached by a toggle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PivotChanges {
    /// Ids that were not linked before.
    pub attached: Vec<Value>,
    /// Ids that were linked before.
    pub detached: Vec<Value>,
}

/// Rows linked through a pivot table.
///
/// Related tables must not have columns of their own starting with `pivot_`;
/// those would be taken for pivot columns.
///
/// ```ignore
/// BelongsToMany::new::<Role>("role_user", "user_id", "role_id").with_pivot(&["granted_by"])
/// ```
#[derive(Debug, Clone)]
pub struct BelongsToMany {
    related: ModelType,
    pivot_table: String,
    foreign_pivot_key: String,
    related_pivot_key: String,
    parent_key: Option<String>,
    related_key: String,
    pivot_columns: Vec<String>,
}

impl BelongsToMany {
    /// Declares a relation to `R` through `pivot_table`.
    ///
    /// `foreign_pivot_key` holds the parent key and `related_pivot_key` the
    /// related key.
    #[must_use]
    pub fn new<R: Model>(
        pivot_table: &str,
        foreign_pivot_key: &str,
        related_pivot_key: &str,
    ) -> Self {
        Self {
            related: ModelType::of::<R>(),
            pivot_table: pivot_table.to_string(),
            foreign_pivot_key: foreign_pivot_key.to_string(),
            related_pivot_key: related_pivot_key.to_string(),
            parent_key: None,
            related_key: R::PRIMARY_KEY.to_string(),
            pivot_columns: Vec::new(),
        }
    }

    /// Uses `column` instead of the parent's primary key.
    #[must_use]
    pub fn parent_key(mut self, column: &str) -> Self {
        self.parent_key = Some(column.to_string());
        self
    }

    /// Uses `column` instead of the related primary key.
    #[must_use]
    pub fn related_key(mut self, column: &str) -> Self {
        self.related_key = column.to_string();
        self
    }

    /// Also selects extra pivot columns into [`Record::pivot`].
    #[must_use]
    pub fn with_pivot(mut self, columns: &[&str]) -> Self {
        self.pivot_columns
            .extend(columns.iter().map(|column| (*column).to_string()));
        self
    }

    /// Returns the pivot table name.
    #[must_use]
    pub fn pivot_table(&self) -> &str {
        &self.pivot_table
    }

    fn pivot_column(&self, column: &str) -> String {
        format!("{}.{column}", self.pivot_table)
    }

    /// Explicit parent key column, or the parent's primary key.
    fn parent_key_column(&self, parent: &Record) -> &str {
        self.parent_key
            .as_deref()
            .unwrap_or(parent.model().primary_key)
    }

    fn parent_key_of<'r>(&self, parent: &'r Record) -> Result<&'r Value> {
        let column = self.parent_key_column(parent);
        parent
            .get_raw(column)
            .filter(|value| !value.is_null())
            .ok_or_else(|| OrmError::MissingKey {
                model: parent.model().name,
                key: column.to_string(),
            })
    }

    /// Adds the related columns, the pivot columns and the pivot join.
    fn select_with_pivot(&self, mut query: QueryBuilder) -> QueryBuilder {
        let columns = &mut query.state_mut().columns;
        if columns.is_empty() {
            columns.push(format!("{}.*", self.related.table));
        }
        let pivot_keys = [&self.foreign_pivot_key, &self.related_pivot_key];
        for column in pivot_keys.into_iter().chain(&self.pivot_columns) {
            columns.push(format!(
                "{} AS {PIVOT_PREFIX}{column}",
                self.pivot_column(column)
            ));
        }
        let on = format!(
            "{} = {}",
            self.related.qualified(&self.related_key),
            self.pivot_column(&self.related_pivot_key)
        );
        query.join(&self.pivot_table, &on)
    }

    fn pivot_query(&self, executor: &Arc<dyn Executor>, parent_key: &Value) -> QueryBuilder {
        QueryBuilder::new(self.pivot_table.as_str(), Arc::clone(executor))
            .where_eq(&self.foreign_pivot_key, parent_key)
    }

    /// Inserts one pivot row per id, with `extra` copied into each row.
    ///
    /// Ids already linked are linked again.
    pub async fn attach(
        &self,
        executor: &Arc<dyn Executor>,
        parent: &Record,
        ids: &[Value],
        extra: &Row,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let parent_key = self.parent_key_of(parent)?;
        let rows: Vec<Row> = ids
            .iter()
            .map(|id| {
                let mut row = extra.clone();
                row.insert(self.foreign_pivot_key.clone(), parent_key.clone());
                row.insert(self.related_pivot_key.clone(), id.clone());
                row
            })
            .collect();
        debug!(pivot = %self.pivot_table, ids = ids.len(), "attaching");
        QueryBuilder::new(self.pivot_table.as_str(), Arc::clone(executor))
            .insert_batch(&rows)
            .await?;
        Ok(())
    }

    /// Deletes the parent's pivot rows, limited to `ids` when given.
    ///
    /// An empty id list deletes nothing and issues no statement.
    pub async fn detach(
        &self,
        executor: &Arc<dyn Executor>,
        parent: &Record,
        ids: Option<&[Value]>,
    ) -> Result<Option<u64>> {
        if ids.is_some_and(<[Value]>::is_empty) {
            return Ok(Some(0));
        }
        let parent_key = self.parent_key_of(parent)?;
        let mut query = self.pivot_query(executor, parent_key);
        if let Some(ids) = ids {
            query = query.where_in(&self.related_pivot_key, ids);
        }
        debug!(pivot = %self.pivot_table, ids = ?ids.map(|ids| ids.len()), "detaching");
        Ok(query.delete().await?)
    }

    /// Returns the related ids currently linked to the parent.
    pub async fn attached_ids(
        &self,
        executor: &Arc<dyn Executor>,
        parent: &Record,
    ) -> Result<Vec<Value>> {
        let parent_key = self.parent_key_of(parent)?;
        Ok(self
            .pivot_query(executor, parent_key)
            .pluck(&self.related_pivot_key)
            .await?)
    }

    /// Replaces the parent's links with exactly `ids`.
    ///
    /// Detaches everything, then attaches `ids`. The two statements are not
    /// atomic; see the crate docs on shared sessions.
    pub async fn sync(
        &self,
        executor: &Arc<dyn Executor>,
        parent: &Record,
        ids: &[Value],
    ) -> Result<()> {
        self.detach(executor, parent, None).await?;
        self.attach(executor, parent, ids, &Row::new()).await
    }

    /// Links the ids that are not linked and unlinks those that are.
    ///
    /// The attach and detach statements run concurrently.
    pub async fn toggle(
        &self,
        executor: &Arc<dyn Executor>,
        parent: &Record,
        ids: &[Value],
    ) -> Result<PivotChanges> {
        let current: HashSet<_> = self
            .attached_ids(executor, parent)
            .await?
            .iter()
            .filter_map(Value::group_key)
            .collect();

        let mut seen = HashSet::new();
        let mut changes = PivotChanges::default();
        for id in ids {
            let Some(key) = id.group_key() else { continue };
            if !seen.insert(key.clone()) {
                continue;
            }
            if current.contains(&key) {
                changes.detached.push(id.clone());
            } else {
                changes.attached.push(id.clone());
            }
        }

        let extra = Row::new();
        futures::try_join!(
            self.attach(executor, parent, &changes.attached, &extra),
            self.detach(executor, parent, Some(changes.detached.as_slice())),
        )?;
        Ok(changes)
    }

    /// Column on the related model the pivot points at.
    #[must_use]
    pub fn related_key_name(&self) -> &str {
        &self.related_key
    }
}

impl Relationship for BelongsToMany {
    fn kind(&self) -> &'static str {
        "BelongsToMany"
    }

    fn related(&self) -> ModelType {
        self.related
    }

    fn add_constraints(&self, query: QueryBuilder, parent: &Record) -> QueryBuilder {
        let query = self.select_with_pivot(query);
        let column = self.pivot_column(&self.foreign_pivot_key);
        where_key(query, &column, parent.get_raw(self.parent_key_column(parent)))
    }

    fn add_eager_constraints(&self, query: QueryBuilder, parents: &[Record]) -> QueryBuilder {
        let keys = parents
            .first()
            .map(|first| collect_keys(parents, self.parent_key_column(first)))
            .unwrap_or_default();
        self.select_with_pivot(query)
            .where_in(&self.pivot_column(&self.foreign_pivot_key), keys)
    }

    fn match_eager(&self, name: &str, parents: &mut [Record], children: Vec<Record>) {
        let groups = group_by(children, |child| {
            child
                .pivot()
                .and_then(|pivot| pivot.get(&self.foreign_pivot_key))
                .and_then(Value::group_key)
        });
        for parent in parents {
            let matched = parent
                .get_raw(self.parent_key_column(parent))
                .and_then(Value::group_key)
                .and_then(|key| groups.get(&key))
                .cloned()
                .unwrap_or_default();
            parent.set_relation(name, Related::Many(matched));
        }
    }

    fn prepare_children(&self, children: &mut [Record]) {
        for child in children {
            child.extract_pivot();
        }
    }
}
