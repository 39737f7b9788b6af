//! Model instances: attribute storage, dirty tracking and loaded relations.
//!
//! Persistence lives in `persistence.rs`; this module is pure in-memory state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use strata_sql_core::{format_datetime, Row, ToValue, Value};

use crate::casts::CastRegistry;
use crate::error::Result;
use crate::model::ModelType;

/// Prefix of joined pivot columns in BelongsToMany result rows.
pub(crate) const PIVOT_PREFIX: &str = "pivot_";

/// A resolved relation value.
///
/// The relation cache only ever holds resolved values; a relation that has
/// not been loaded is simply absent.
#[derive(Debug, Clone)]
pub enum Related {
    /// HasOne / BelongsTo result (None when nothing matched).
    One(Option<Box<Record>>),
    /// HasMany / BelongsToMany result.
    Many(Vec<Record>),
}

/// One row of a model, with the snapshot it was loaded or saved with.
#[derive(Clone)]
pub struct Record {
    pub(crate) model: ModelType,
    pub(crate) casts: Arc<CastRegistry>,
    pub(crate) attributes: Row,
    pub(crate) original: Row,
    pub(crate) exists: bool,
    pub(crate) relations: BTreeMap<String, Related>,
    pub(crate) pivot: Option<Row>,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("model", &self.model.name)
            .field("exists", &self.exists)
            .field("attributes", &self.attributes)
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Record {
    /// Creates a new, unsaved record.
    #[must_use]
    pub fn new(model: ModelType) -> Self {
        Self::with_casts(model, model.cast_registry())
    }

    pub(crate) fn with_casts(model: ModelType, casts: Arc<CastRegistry>) -> Self {
        Self {
            model,
            casts,
            attributes: Row::new(),
            original: Row::new(),
            exists: false,
            relations: BTreeMap::new(),
            pivot: None,
        }
    }

    /// Wraps a stored row as an existing, clean record.
    #[must_use]
    pub fn hydrate(model: ModelType, row: Row) -> Self {
        Self::hydrate_with(model, model.cast_registry(), row)
    }

    pub(crate) fn hydrate_with(model: ModelType, casts: Arc<CastRegistry>, row: Row) -> Self {
        let mut record = Self::with_casts(model, casts);
        record.original.clone_from(&row);
        record.attributes = row;
        record.exists = true;
        record
    }

    /// Hydrates many rows sharing one cast registry.
    #[must_use]
    pub fn hydrate_all(model: ModelType, rows: Vec<Row>) -> Vec<Self> {
        let casts = model.cast_registry();
        rows.into_iter()
            .map(|row| Self::hydrate_with(model, Arc::clone(&casts), row))
            .collect()
    }

    /// Returns the model this record belongs to.
    #[must_use]
    pub const fn model(&self) -> ModelType {
        self.model
    }

    /// Returns whether the record is persisted.
    #[must_use]
    pub const fn exists(&self) -> bool {
        self.exists
    }

    // ---------------------------------------------------------------------
    // Attributes
    // ---------------------------------------------------------------------

    /// Reads an attribute through its cast. Unset attributes read as NULL.
    pub fn get(&self, key: &str) -> Result<Value> {
        match self.attributes.get(key) {
            Some(value) => self.casts.deserialize(key, value),
            None => Ok(Value::Null),
        }
    }

    /// Reads an attribute in storage form.
    #[must_use]
    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Writes an attribute through its cast, bypassing mass-assignment rules.
    pub fn set<V: ToValue>(&mut self, key: &str, value: V) -> Result<&mut Self> {
        let stored = self.casts.serialize(key, value.to_value())?;
        self.attributes.insert(key.to_string(), stored);
        Ok(self)
    }

    /// Writes an attribute in storage form, skipping its cast.
    pub fn set_raw<V: ToValue>(&mut self, key: &str, value: V) -> &mut Self {
        self.attributes.insert(key.to_string(), value.to_value());
        self
    }

    /// Mass-assigns attributes. Keys the model does not allow are skipped.
    pub fn fill<I, K, V>(&mut self, attributes: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: ToValue,
    {
        for (key, value) in attributes {
            let key = key.as_ref();
            if self.model.is_fillable(key) {
                self.set(key, value)?;
            }
        }
        Ok(self)
    }

    /// Mass-assigns attributes ignoring the fillable and guarded lists.
    pub fn force_fill<I, K, V>(&mut self, attributes: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: ToValue,
    {
        for (key, value) in attributes {
            self.set(key.as_ref(), value)?;
        }
        Ok(self)
    }

    /// Returns all attributes in storage form.
    #[must_use]
    pub const fn attributes(&self) -> &Row {
        &self.attributes
    }

    /// Returns the primary-key value, if set.
    #[must_use]
    pub fn key(&self) -> Option<&Value> {
        self.attributes
            .get(self.model.primary_key)
            .filter(|value| !value.is_null())
    }

    // ---------------------------------------------------------------------
    // Dirty tracking
    // ---------------------------------------------------------------------

    /// Returns the snapshot taken at the last load or save.
    #[must_use]
    pub const fn original(&self) -> &Row {
        &self.original
    }

    /// Returns one attribute from the snapshot.
    #[must_use]
    pub fn get_original(&self, key: &str) -> Option<&Value> {
        self.original.get(key)
    }

    /// Returns the attributes that differ from the snapshot.
    #[must_use]
    pub fn get_dirty(&self) -> Row {
        self.attributes
            .iter()
            .filter(|(key, value)| self.original.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Returns whether any attribute differs from the snapshot.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.attributes
            .iter()
            .any(|(key, value)| self.original.get(key) != Some(value))
    }

    /// Returns whether `key` differs from the snapshot.
    #[must_use]
    pub fn is_dirty_key(&self, key: &str) -> bool {
        self.attributes.get(key) != self.original.get(key)
    }

    /// Returns whether the record matches its snapshot.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self.is_dirty()
    }

    /// Retakes the snapshot from the current attributes.
    pub fn sync_original(&mut self) {
        self.original.clone_from(&self.attributes);
    }

    // ---------------------------------------------------------------------
    // Relations
    // ---------------------------------------------------------------------

    /// Returns a loaded relation.
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    /// Returns whether a relation has been loaded.
    #[must_use]
    pub fn relation_loaded(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    /// Returns a loaded single-valued relation.
    #[must_use]
    pub fn related_one(&self, name: &str) -> Option<&Self> {
        match self.relations.get(name) {
            Some(Related::One(Some(record))) => Some(&**record),
            _ => None,
        }
    }

    /// Returns a loaded list relation (empty when not loaded).
    #[must_use]
    pub fn related_many(&self, name: &str) -> &[Self] {
        match self.relations.get(name) {
            Some(Related::Many(records)) => records,
            _ => &[],
        }
    }

    /// Stores a resolved relation value.
    pub fn set_relation(&mut self, name: impl Into<String>, related: Related) -> &mut Self {
        self.relations.insert(name.into(), related);
        self
    }

    /// Forgets a loaded relation.
    pub fn unset_relation(&mut self, name: &str) -> Option<Related> {
        self.relations.remove(name)
    }

    /// Returns the names of all loaded relations.
    pub fn loaded_relations(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }

    /// Returns pivot columns of a record loaded through a many-to-many relation.
    #[must_use]
    pub const fn pivot(&self) -> Option<&Row> {
        self.pivot.as_ref()
    }

    /// Moves `pivot_*` attributes into the pivot row.
    pub(crate) fn extract_pivot(&mut self) {
        let keys: Vec<String> = self
            .attributes
            .keys()
            .filter(|key| key.starts_with(PIVOT_PREFIX))
            .cloned()
            .collect();
        if keys.is_empty() {
            return;
        }
        let pivot = self.pivot.get_or_insert_with(Row::new);
        for key in keys {
            if let Some(value) = self.attributes.remove(&key) {
                self.original.remove(&key);
                pivot.insert(key[PIVOT_PREFIX.len()..].to_string(), value);
            }
        }
    }

    /// Copy without loaded relations.
    pub(crate) fn detached(&self) -> Self {
        Self {
            model: self.model,
            casts: Arc::clone(&self.casts),
            attributes: self.attributes.clone(),
            original: self.original.clone(),
            exists: self.exists,
            relations: BTreeMap::new(),
            pivot: self.pivot.clone(),
        }
    }

    // ---------------------------------------------------------------------
    // Soft deletes and serialization
    // ---------------------------------------------------------------------

    /// Returns whether the record carries a delete marker.
    #[must_use]
    pub fn trashed(&self) -> bool {
        self.model.soft_deletes
            && self
                .attributes
                .get(self.model.deleted_at)
                .is_some_and(|value| !value.is_null())
    }

    /// Projects the record into JSON: cast attributes minus hidden ones,
    /// loaded relations, and pivot columns under `"pivot"`.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let hidden = self.model.hidden();
        let mut map = serde_json::Map::new();
        for key in self.attributes.keys() {
            if hidden.contains(&key.as_str()) {
                continue;
            }
            map.insert(key.clone(), self.get(key)?.to_json());
        }
        for (name, related) in &self.relations {
            let value = match related {
                Related::One(Some(record)) => record.to_json()?,
                Related::One(None) => serde_json::Value::Null,
                Related::Many(records) => serde_json::Value::Array(
                    records
                        .iter()
                        .map(Self::to_json)
                        .collect::<Result<Vec<_>>>()?,
                ),
            };
            map.insert(name.clone(), value);
        }
        if let Some(pivot) = &self.pivot {
            let pivot = pivot
                .iter()
                .map(|(key, value)| (key.clone(), value.to_json()))
                .collect();
            map.insert(String::from("pivot"), serde_json::Value::Object(pivot));
        }
        Ok(serde_json::Value::Object(map))
    }

    /// Stamps the timestamp column in its storage form.
    pub(crate) fn stamp(&mut self, column: &str, now: DateTime<Utc>) -> Result<()> {
        let value = timestamp_value(&self.casts, column, now)?;
        self.attributes.insert(column.to_string(), value);
        Ok(())
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

/// Storage form of `now` for a timestamp column.
///
/// Cast columns go through their cast; uncast columns get
/// `YYYY-MM-DD HH:MM:SS` text.
pub(crate) fn timestamp_value(
    casts: &CastRegistry,
    column: &str,
    now: DateTime<Utc>,
) -> Result<Value> {
    if casts.get(column).is_some() {
        casts.serialize(column, Value::DateTime(now))
    } else {
        Ok(Value::Text(format_datetime(&now)))
    }
}
