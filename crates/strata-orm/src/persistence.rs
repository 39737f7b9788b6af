//! Writing records back to storage.
//!
//! Every method here takes the [`Database`] explicitly. Persistence always
//! targets the row by primary key and ignores global scopes.

use chrono::Utc;
use strata_sql_core::{QueryBuilder, Row, ToValue, Value};
use tracing::debug;

use crate::db::Database;
use crate::error::{OrmError, Result};
use crate::hooks::HookEvent;
use crate::query::load_relations;
use crate::record::{Record, Related};
use crate::relations::{Relation, RelationQuery};

impl Record {
    /// Inserts or updates the record.
    ///
    /// Returns `Ok(false)` when a before-hook aborted the save. An existing
    /// record without changes is not written and fires no hooks.
    pub async fn save(&mut self, db: &Database) -> Result<bool> {
        if self.exists && self.is_clean() {
            return Ok(true);
        }
        let hooks = db.hooks();
        if !hooks.run(HookEvent::Saving, self).await {
            return Ok(false);
        }
        let written = if self.exists {
            self.perform_update(db).await?
        } else {
            self.perform_insert(db).await?
        };
        if !written {
            return Ok(false);
        }
        hooks.run(HookEvent::Saved, self).await;
        self.sync_original();
        Ok(true)
    }

    async fn perform_insert(&mut self, db: &Database) -> Result<bool> {
        if !db.hooks().run(HookEvent::Creating, self).await {
            return Ok(false);
        }
        if self.model.timestamps {
            let now = Utc::now();
            for column in [self.model.created_at, self.model.updated_at] {
                if !self.is_dirty_key(column) {
                    self.stamp(column, now)?;
                }
            }
        }

        let mut row = self.attributes.clone();
        if row.get(self.model.primary_key).is_some_and(Value::is_null) {
            row.remove(self.model.primary_key);
        }
        let stored = db.base_query(self.model)?.insert(row).await?;
        self.attributes.extend(stored);
        self.exists = true;
        debug!(model = self.model.name, key = ?self.key(), "inserted record");

        db.hooks().run(HookEvent::Created, self).await;
        Ok(true)
    }

    async fn perform_update(&mut self, db: &Database) -> Result<bool> {
        if !db.hooks().run(HookEvent::Updating, self).await {
            return Ok(false);
        }
        if self.model.timestamps && !self.is_dirty_key(self.model.updated_at) {
            self.stamp(self.model.updated_at, Utc::now())?;
        }

        let dirty = self.get_dirty();
        self.by_key(db)?.update(dirty).await?;
        debug!(model = self.model.name, key = ?self.key(), "updated record");

        db.hooks().run(HookEvent::Updated, self).await;
        Ok(true)
    }

    /// Unscoped builder targeting this record's row.
    fn by_key(&self, db: &Database) -> Result<QueryBuilder> {
        let key = self.key().cloned().ok_or_else(|| OrmError::MissingKey {
            model: self.model.name,
            key: self.model.primary_key.to_string(),
        })?;
        let column = self.model.qualified(self.model.primary_key);
        Ok(db.base_query(self.model)?.where_eq(&column, key))
    }

    /// Deletes the record.
    ///
    /// Soft-deleting models get their delete marker set and the row stays in
    /// storage. Returns `Ok(false)` for unsaved records or when a hook
    /// aborted the delete.
    pub async fn delete(&mut self, db: &Database) -> Result<bool> {
        self.perform_delete(db, !self.model.soft_deletes).await
    }

    /// Removes the row even on soft-deleting models.
    pub async fn force_delete(&mut self, db: &Database) -> Result<bool> {
        self.perform_delete(db, true).await
    }

    async fn perform_delete(&mut self, db: &Database, hard: bool) -> Result<bool> {
        if !self.exists {
            return Ok(false);
        }
        if !db.hooks().run(HookEvent::Deleting, self).await {
            return Ok(false);
        }

        if hard {
            self.by_key(db)?.delete().await?;
            self.exists = false;
        } else {
            let now = Utc::now();
            let mut columns = vec![self.model.deleted_at];
            if self.model.timestamps {
                columns.push(self.model.updated_at);
            }
            let mut row = Row::new();
            for column in columns {
                self.stamp(column, now)?;
                if let Some(value) = self.attributes.get(column) {
                    row.insert(column.to_string(), value.clone());
                    self.original.insert(column.to_string(), value.clone());
                }
            }
            self.by_key(db)?.update(row).await?;
        }
        debug!(model = self.model.name, key = ?self.key(), hard, "deleted record");

        db.hooks().run(HookEvent::Deleted, self).await;
        Ok(true)
    }

    /// Clears the delete marker and saves.
    pub async fn restore(&mut self, db: &Database) -> Result<bool> {
        if !self.model.soft_deletes {
            return Err(OrmError::NotSoftDeletable {
                model: self.model.name,
            });
        }
        if !db.hooks().run(HookEvent::Restoring, self).await {
            return Ok(false);
        }
        let column = self.model.deleted_at;
        let marker = self.attributes.get(column).cloned();
        self.set_raw(column, Value::Null);
        let saved = self.save(db).await;
        if !matches!(saved, Ok(true)) {
            // The row is still trashed; keep the marker in step with it.
            match marker {
                Some(value) => {
                    self.set_raw(column, value);
                }
                None => {
                    self.attributes.remove(column);
                }
            }
            return saved;
        }
        db.hooks().run(HookEvent::Restored, self).await;
        Ok(true)
    }

    /// Reloads attributes from storage and reloads loaded relations.
    pub async fn refresh(&mut self, db: &Database) -> Result<&mut Self> {
        let row = self
            .by_key(db)?
            .first()
            .await?
            .ok_or(OrmError::NotFound {
                model: self.model.name,
            })?;
        self.original.clone_from(&row);
        self.attributes = row;
        self.exists = true;

        let loaded: Vec<String> = self.loaded_relations().map(str::to_string).collect();
        self.relations.clear();
        if !loaded.is_empty() {
            let paths: Vec<&str> = loaded.iter().map(String::as_str).collect();
            self.load(db, &paths).await?;
        }
        Ok(self)
    }

    /// Loads a new instance of the stored row, ignoring scopes.
    pub async fn fresh(&self, db: &Database) -> Result<Option<Self>> {
        let Some(key) = self.key() else {
            return Ok(None);
        };
        db.query_for(self.model)?
            .without_global_scopes()
            .find(key)
            .await
    }

    /// Eager-loads relation paths onto this record.
    pub async fn load(&mut self, db: &Database, paths: &[&str]) -> Result<&mut Self> {
        load_relations(db, std::slice::from_mut(self), paths).await?;
        Ok(self)
    }

    /// Mass-assigns `attributes` and saves.
    pub async fn update<I, K, V>(&mut self, db: &Database, attributes: I) -> Result<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: ToValue,
    {
        self.fill(attributes)?;
        self.save(db).await
    }

    /// Starts a query over one of this record's relations.
    pub fn related<'db>(&self, db: &'db Database, name: &str) -> Result<RelationQuery<'db>> {
        RelationQuery::new(db, self, name)
    }

    /// Points a BelongsTo relation at `owner` without saving.
    pub fn associate(&mut self, name: &str, owner: &Self) -> Result<&mut Self> {
        let relation = self.model.relation(name)?;
        let Relation::BelongsTo(belongs_to) = &relation else {
            return Err(OrmError::UnsupportedRelationOperation {
                relation: relation.kind(),
                operation: "associate",
            });
        };
        let key = owner
            .get_raw(belongs_to.owner_key_name())
            .cloned()
            .unwrap_or(Value::Null);
        self.set_raw(belongs_to.foreign_key(), key);
        self.set_relation(name, Related::One(Some(Box::new(owner.clone()))));
        Ok(self)
    }

    /// Clears a BelongsTo relation without saving.
    pub fn dissociate(&mut self, name: &str) -> Result<&mut Self> {
        let relation = self.model.relation(name)?;
        let Relation::BelongsTo(belongs_to) = &relation else {
            return Err(OrmError::UnsupportedRelationOperation {
                relation: relation.kind(),
                operation: "dissociate",
            });
        };
        self.set_raw(belongs_to.foreign_key(), Value::Null);
        self.set_relation(name, Related::One(None));
        Ok(self)
    }
}
