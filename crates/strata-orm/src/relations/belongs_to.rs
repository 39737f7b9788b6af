//! BelongsTo: the parent row holds the related row's key.

use strata_sql_core::QueryBuilder;

use super::{collect_keys, group_by, key_of, where_key, Relationship};
use crate::model::{Model, ModelType};
use crate::record::{Record, Related};

/// The row whose key this record holds.
///
/// ```ignore
/// BelongsTo::new::<User>("user_id")
/// ```
#[derive(Debug, Clone)]
pub struct BelongsTo {
    related: ModelType,
    foreign_key: String,
    owner_key: String,
}

impl BelongsTo {
    /// Declares a relation to `R` through `self.foreign_key = R.primary_key`.
    #[must_use]
    pub fn new<R: Model>(foreign_key: &str) -> Self {
        Self {
            related: ModelType::of::<R>(),
            foreign_key: foreign_key.to_string(),
            owner_key: R::PRIMARY_KEY.to_string(),
        }
    }

    /// Uses `column` instead of the related primary key.
    #[must_use]
    pub fn owner_key(mut self, column: &str) -> Self {
        self.owner_key = column.to_string();
        self
    }

    /// Column on this record holding the related key.
    #[must_use]
    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    /// Column on the related record the foreign key points at.
    #[must_use]
    pub fn owner_key_name(&self) -> &str {
        &self.owner_key
    }
}

impl Relationship for BelongsTo {
    fn kind(&self) -> &'static str {
        "BelongsTo"
    }

    fn related(&self) -> ModelType {
        self.related
    }

    fn add_constraints(&self, query: QueryBuilder, parent: &Record) -> QueryBuilder {
        let column = self.related.qualified(&self.owner_key);
        where_key(query, &column, parent.get_raw(&self.foreign_key))
    }

    fn add_eager_constraints(&self, query: QueryBuilder, parents: &[Record]) -> QueryBuilder {
        let keys = collect_keys(parents, &self.foreign_key);
        query.where_in(&self.related.qualified(&self.owner_key), keys)
    }

    fn match_eager(&self, name: &str, parents: &mut [Record], children: Vec<Record>) {
        let owners = group_by(children, |child| key_of(child, &self.owner_key));
        for parent in parents {
            let owner = key_of(parent, &self.foreign_key)
                .and_then(|key| owners.get(&key))
                .and_then(|matched| matched.first())
                .cloned()
                .map(Box::new);
            parent.set_relation(name, Related::One(owner));
        }
    }
}
