//! Relationships between models.
//!
//! Every relation kind implements [`Relationship`]: one constraint builder
//! for a single parent (lazy access), one for a whole parent set (eager
//! loading), and a match routine that distributes eager results back onto
//! the parents. [`Relation`] is the declaration a model returns from
//! `Model::relation` and selects the implementation.

mod belongs_to;
mod belongs_to_many;
mod has_one_or_many;
mod query;

pub use belongs_to::BelongsTo;
pub use belongs_to_many::{BelongsToMany, PivotChanges};
pub use has_one_or_many::{HasMany, HasOne};
pub use query::RelationQuery;

use std::collections::{HashMap, HashSet};

use strata_sql_core::{GroupKey, QueryBuilder, Value};

use crate::model::ModelType;
use crate::record::Record;

/// Constraint and matching strategy of one relation kind.
pub trait Relationship: Send + Sync {
    /// Kind name used in logs and errors.
    fn kind(&self) -> &'static str;

    /// The model on the far side of the relation.
    fn related(&self) -> ModelType;

    /// Restricts `query` to the rows related to `parent`.
    fn add_constraints(&self, query: QueryBuilder, parent: &Record) -> QueryBuilder;

    /// Restricts `query` to the rows related to any of `parents`.
    fn add_eager_constraints(&self, query: QueryBuilder, parents: &[Record]) -> QueryBuilder;

    /// Assigns `children` to the matching parents under `name`.
    ///
    /// Every parent receives a value, empty or null when nothing matched.
    fn match_eager(&self, name: &str, parents: &mut [Record], children: Vec<Record>);

    /// Post-processes fetched children before they are handed out.
    fn prepare_children(&self, children: &mut [Record]) {
        let _ = children;
    }
}

/// A relation declaration.
#[derive(Debug, Clone)]
pub enum Relation {
    /// One child row holding the parent's key.
    HasOne(HasOne),
    /// Many child rows holding the parent's key.
    HasMany(HasMany),
    /// The row whose key the parent holds.
    BelongsTo(BelongsTo),
    /// Rows linked through a pivot table.
    BelongsToMany(BelongsToMany),
}

impl Relation {
    /// Returns the strategy implementing this declaration.
    #[must_use]
    pub fn strategy(&self) -> &dyn Relationship {
        match self {
            Self::HasOne(relation) => relation,
            Self::HasMany(relation) => relation,
            Self::BelongsTo(relation) => relation,
            Self::BelongsToMany(relation) => relation,
        }
    }

    /// Kind name of the declaration.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.strategy().kind()
    }
}

impl From<HasOne> for Relation {
    fn from(relation: HasOne) -> Self {
        Self::HasOne(relation)
    }
}

impl From<HasMany> for Relation {
    fn from(relation: HasMany) -> Self {
        Self::HasMany(relation)
    }
}

impl From<BelongsTo> for Relation {
    fn from(relation: BelongsTo) -> Self {
        Self::BelongsTo(relation)
    }
}

impl From<BelongsToMany> for Relation {
    fn from(relation: BelongsToMany) -> Self {
        Self::BelongsToMany(relation)
    }
}

/// Distinct non-null values of `column` across `records`, in first-seen order.
pub(crate) fn collect_keys<'r>(
    records: impl IntoIterator<Item = &'r Record>,
    column: &str,
) -> Vec<Value> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter_map(|record| record.get_raw(column))
        .filter(|value| value.group_key().is_some_and(|key| seen.insert(key)))
        .cloned()
        .collect()
}

/// Groups records by the value `key_of` reads from each one.
pub(crate) fn group_by<F>(records: Vec<Record>, key_of: F) -> HashMap<GroupKey, Vec<Record>>
where
    F: Fn(&Record) -> Option<GroupKey>,
{
    let mut groups: HashMap<GroupKey, Vec<Record>> = HashMap::new();
    for record in records {
        if let Some(key) = key_of(&record) {
            groups.entry(key).or_default().push(record);
        }
    }
    groups
}

/// Reads the grouping key of `column` from a record.
pub(crate) fn key_of(record: &Record, column: &str) -> Option<GroupKey> {
    record.get_raw(column).and_then(Value::group_key)
}

/// Restricts `query` to `column = value`, or to nothing when `value` is unset.
pub(crate) fn where_key(query: QueryBuilder, column: &str, value: Option<&Value>) -> QueryBuilder {
    match value.filter(|value| !value.is_null()) {
        Some(value) => query.where_eq(column, value),
        None => query.where_in(column, Vec::<Value>::new()),
    }
}
