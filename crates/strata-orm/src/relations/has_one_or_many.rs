//! HasOne and HasMany: the child rows hold the parent's key.

use strata_sql_core::QueryBuilder;

use super::{collect_keys, group_by, key_of, where_key, Relationship};
use crate::model::{Model, ModelType};
use crate::record::{Record, Related};

/// Keys shared by both kinds.
#[derive(Debug, Clone)]
struct ChildKeys {
    related: ModelType,
    foreign_key: String,
    local_key: Option<String>,
}

impl ChildKeys {
    fn new<R: Model>(foreign_key: &str) -> Self {
        Self {
            related: ModelType::of::<R>(),
            foreign_key: foreign_key.to_string(),
            local_key: None,
        }
    }

    /// Explicit local key, or the parent's primary key.
    fn local_key(&self, parent: &Record) -> &str {
        self.local_key
            .as_deref()
            .unwrap_or(parent.model().primary_key)
    }

    fn qualified_foreign_key(&self) -> String {
        self.related.qualified(&self.foreign_key)
    }

    fn constrain(&self, query: QueryBuilder, parent: &Record) -> QueryBuilder {
        let column = self.qualified_foreign_key();
        let query = where_key(query, &column, parent.get_raw(self.local_key(parent)));
        query.where_not_null(&column)
    }

    fn constrain_eager(&self, query: QueryBuilder, parents: &[Record]) -> QueryBuilder {
        let keys = parents
            .first()
            .map(|first| collect_keys(parents, self.local_key(first)))
            .unwrap_or_default();
        query.where_in(&self.qualified_foreign_key(), keys)
    }

    fn distribute(
        &self,
        name: &str,
        parents: &mut [Record],
        children: Vec<Record>,
        wrap: impl Fn(Vec<Record>) -> Related,
    ) {
        let groups = group_by(children, |child| key_of(child, &self.foreign_key));
        for parent in parents {
            let matched = key_of(parent, self.local_key(parent))
                .and_then(|key| groups.get(&key))
                .cloned()
                .unwrap_or_default();
            parent.set_relation(name, wrap(matched));
        }
    }
}

/// One child row holding the parent's key.
///
/// ```ignore
/// HasOne::new::<Profile>("user_id")
/// ```
#[derive(Debug, Clone)]
pub struct HasOne(ChildKeys);

impl HasOne {
    /// Declares a relation to `R` through `R.foreign_key = parent.<primary key>`.
    #[must_use]
    pub fn new<R: Model>(foreign_key: &str) -> Self {
        Self(ChildKeys::new::<R>(foreign_key))
    }

    /// Uses `column` instead of the parent's primary key.
    #[must_use]
    pub fn local_key(mut self, column: &str) -> Self {
        self.0.local_key = Some(column.to_string());
        self
    }

    /// Column on the child holding the parent key.
    #[must_use]
    pub fn foreign_key(&self) -> &str {
        &self.0.foreign_key
    }

    /// Parent-side key column for `parent`.
    #[must_use]
    pub fn parent_key(&self, parent: &Record) -> &str {
        self.0.local_key(parent)
    }
}

impl Relationship for HasOne {
    fn kind(&self) -> &'static str {
        "HasOne"
    }

    fn related(&self) -> ModelType {
        self.0.related
    }

    fn add_constraints(&self, query: QueryBuilder, parent: &Record) -> QueryBuilder {
        self.0.constrain(query, parent)
    }

    fn add_eager_constraints(&self, query: QueryBuilder, parents: &[Record]) -> QueryBuilder {
        self.0.constrain_eager(query, parents)
    }

    fn match_eager(&self, name: &str, parents: &mut [Record], children: Vec<Record>) {
        self.0.distribute(name, parents, children, |matched| {
            Related::One(matched.into_iter().next().map(Box::new))
        });
    }
}

/// Many child rows holding the parent's key.
///
/// ```ignore
/// HasMany::new::<Post>("user_id")
/// ```
#[derive(Debug, Clone)]
pub struct HasMany(ChildKeys);

impl HasMany {
    /// Declares a relation to `R` through `R.foreign_key = parent.<primary key>`.
    #[must_use]
    pub fn new<R: Model>(foreign_key: &str) -> Self {
        Self(ChildKeys::new::<R>(foreign_key))
    }

    /// Uses `column` instead of the parent's primary key.
    #[must_use]
    pub fn local_key(mut self, column: &str) -> Self {
        self.0.local_key = Some(column.to_string());
        self
    }

    /// Column on the child holding the parent key.
    #[must_use]
    pub fn foreign_key(&self) -> &str {
        &self.0.foreign_key
    }

    /// Parent-side key column for `parent`.
    #[must_use]
    pub fn parent_key(&self, parent: &Record) -> &str {
        self.0.local_key(parent)
    }
}

impl Relationship for HasMany {
    fn kind(&self) -> &'static str {
        "HasMany"
    }

    fn related(&self) -> ModelType {
        self.0.related
    }

    fn add_constraints(&self, query: QueryBuilder, parent: &Record) -> QueryBuilder {
        self.0.constrain(query, parent)
    }

    fn add_eager_constraints(&self, query: QueryBuilder, parents: &[Record]) -> QueryBuilder {
        self.0.constrain_eager(query, parents)
    }

    fn match_eager(&self, name: &str, parents: &mut [Record], children: Vec<Record>) {
        self.0.distribute(name, parents, children, Related::Many);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_support::NullExecutor;
    use strata_sql_core::{Row, Value};

    struct Owner;

    impl Model for Owner {
        const NAME: &'static str = "Owner";
        const TABLE: &'static str = "owners";
    }

    struct Keeper;

    impl Model for Keeper {
        const NAME: &'static str = "Keeper";
        const TABLE: &'static str = "keepers";
        const PRIMARY_KEY: &'static str = "keeper_id";
    }

    struct Pet;

    impl Model for Pet {
        const NAME: &'static str = "Pet";
        const TABLE: &'static str = "pets";
    }

    fn record<M: Model>(pairs: &[(&str, Value)]) -> Record {
        let row: Row = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        Record::hydrate(ModelType::of::<M>(), row)
    }

    fn pets() -> QueryBuilder {
        QueryBuilder::new("pets", Arc::new(NullExecutor))
    }

    #[test]
    fn test_lazy_constraint() {
        let relation = HasMany::new::<Pet>("owner_id");
        let owner = record::<Owner>(&[("id", Value::Int(4))]);
        let (sql, params) = relation.add_constraints(pets(), &owner).to_sql();
        assert_eq!(
            sql,
            "SELECT * FROM pets WHERE pets.owner_id = ? AND pets.owner_id IS NOT NULL"
        );
        assert_eq!(params, vec![Value::Int(4)]);
    }

    #[test]
    fn test_lazy_constraint_without_parent_key_matches_nothing() {
        let relation = HasOne::new::<Pet>("owner_id");
        let unsaved = record::<Owner>(&[]);
        let (sql, _) = relation.add_constraints(pets(), &unsaved).to_sql();
        assert!(sql.contains("0 = 1"));
    }

    #[test]
    fn test_eager_constraint_uses_distinct_keys() {
        let relation = HasMany::new::<Pet>("owner_id");
        let owners = vec![
            record::<Owner>(&[("id", Value::Int(1))]),
            record::<Owner>(&[("id", Value::Int(2))]),
            record::<Owner>(&[("id", Value::Int(1))]),
        ];
        let (sql, params) = relation.add_eager_constraints(pets(), &owners).to_sql();
        assert_eq!(sql, "SELECT * FROM pets WHERE pets.owner_id IN (?, ?)");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_match_assigns_every_parent() {
        let relation = HasMany::new::<Pet>("owner_id");
        let mut owners = vec![
            record::<Owner>(&[("id", Value::Int(1))]),
            record::<Owner>(&[("id", Value::Int(2))]),
        ];
        let pets = vec![
            record::<Pet>(&[("id", Value::Int(10)), ("owner_id", Value::Int(1))]),
            record::<Pet>(&[("id", Value::Int(11)), ("owner_id", Value::Int(1))]),
        ];
        relation.match_eager("pets", &mut owners, pets);
        assert_eq!(owners[0].related_many("pets").len(), 2);
        assert!(owners[1].relation_loaded("pets"));
        assert!(owners[1].related_many("pets").is_empty());
    }

    #[test]
    fn test_has_one_takes_first_match_or_null() {
        let relation = HasOne::new::<Pet>("owner_id");
        let mut owners = vec![
            record::<Owner>(&[("id", Value::Int(1))]),
            record::<Owner>(&[("id", Value::Int(2))]),
        ];
        let pets = vec![record::<Pet>(&[
            ("id", Value::Int(10)),
            ("owner_id", Value::Int(2)),
        ])];
        relation.match_eager("pet", &mut owners, pets);
        assert!(owners[0].related_one("pet").is_none());
        assert!(matches!(owners[0].relation("pet"), Some(Related::One(None))));
        assert_eq!(
            owners[1].related_one("pet").and_then(|p| p.key().cloned()),
            Some(Value::Int(10))
        );
    }

    #[test]
    fn test_parent_key_defaults_to_parent_primary_key() {
        let relation = HasMany::new::<Pet>("keeper_ref");
        let keeper = record::<Keeper>(&[("keeper_id", Value::Int(7))]);
        assert_eq!(relation.parent_key(&keeper), "keeper_id");
        let (_, params) = relation.add_constraints(pets(), &keeper).to_sql();
        assert_eq!(params, vec![Value::Int(7)]);

        let mut keepers = vec![keeper];
        let pets = vec![record::<Pet>(&[
            ("id", Value::Int(3)),
            ("keeper_ref", Value::Int(7)),
        ])];
        relation.match_eager("pets", &mut keepers, pets);
        assert_eq!(keepers[0].related_many("pets").len(), 1);

        let relation = relation.local_key("badge");
        assert_eq!(relation.parent_key(&keepers[0]), "badge");
    }
}
