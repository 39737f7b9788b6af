//! Model trait and related types.
//!
//! A model is a zero-sized type that describes one table: its name, key,
//! timestamp and soft-delete columns, mass-assignment lists, casts and
//! relations. Instances of a model are [`Record`]s.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use strata_sql_core::{Row, ToValue};

use crate::casts::{Cast, CastRegistry};
use crate::db::Database;
use crate::error::{OrmError, Result};
use crate::query::ModelQueryBuilder;
use crate::record::Record;
use crate::relations::Relation;

/// A database model.
///
/// # Example
///
/// ```ignore
/// use strata_orm::{Cast, HasMany, Model, Relation};
///
/// struct User;
///
/// impl Model for User {
///     const NAME: &'static str = "User";
///     const TABLE: &'static str = "users";
///
///     fn fillable() -> &'static [&'static str] {
///         &["name", "email", "is_admin"]
///     }
///
///     fn casts() -> Vec<(&'static str, Cast)> {
///         vec![("is_admin", Cast::Boolean)]
///     }
///
///     fn relation(name: &str) -> Option<Relation> {
///         match name {
///             "posts" => Some(HasMany::new::<Post>("user_id").into()),
///             _ => None,
///         }
///     }
/// }
/// ```
pub trait Model: Sized + Send + Sync + 'static {
    /// Display name used in logs and errors.
    const NAME: &'static str;

    /// Table name.
    const TABLE: &'static str;

    /// Primary-key column.
    const PRIMARY_KEY: &'static str = "id";

    /// Whether saves stamp the created/updated columns.
    const TIMESTAMPS: bool = true;

    /// Column stamped on insert.
    const CREATED_AT: &'static str = "created_at";

    /// Column stamped on insert and update.
    const UPDATED_AT: &'static str = "updated_at";

    /// Whether `delete` marks rows instead of removing them.
    const SOFT_DELETES: bool = false;

    /// Column holding the delete marker.
    const DELETED_AT: &'static str = "deleted_at";

    /// Attributes `fill` may assign. Empty means "everything not guarded".
    fn fillable() -> &'static [&'static str] {
        &[]
    }

    /// Attributes `fill` never assigns. `"*"` guards everything.
    fn guarded() -> &'static [&'static str] {
        &[]
    }

    /// Attributes left out of `to_json`.
    fn hidden() -> &'static [&'static str] {
        &[]
    }

    /// Attribute casts.
    fn casts() -> Vec<(&'static str, Cast)> {
        Vec::new()
    }

    /// Returns the relation declared under `name`.
    fn relation(name: &str) -> Option<Relation> {
        let _ = name;
        None
    }
}

/// Static description of a model, usable without naming its type.
///
/// Relations and records carry this token instead of a type parameter so
/// that heterogeneous relation graphs can be walked at runtime.
#[derive(Clone, Copy)]
pub struct ModelType {
    id: TypeId,
    /// Display name.
    pub name: &'static str,
    /// Table name.
    pub table: &'static str,
    /// Primary-key column.
    pub primary_key: &'static str,
    /// Whether timestamps are maintained.
    pub timestamps: bool,
    /// Created-at column.
    pub created_at: &'static str,
    /// Updated-at column.
    pub updated_at: &'static str,
    /// Whether deletes are soft.
    pub soft_deletes: bool,
    /// Deleted-at column.
    pub deleted_at: &'static str,
    fillable: fn() -> &'static [&'static str],
    guarded: fn() -> &'static [&'static str],
    hidden: fn() -> &'static [&'static str],
    casts: fn() -> Vec<(&'static str, Cast)>,
    relation: fn(&str) -> Option<Relation>,
}

impl fmt::Debug for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelType")
            .field("name", &self.name)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl PartialEq for ModelType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ModelType {}

impl ModelType {
    /// Returns the token for `M`.
    #[must_use]
    pub fn of<M: Model>() -> Self {
        Self {
            id: TypeId::of::<M>(),
            name: M::NAME,
            table: M::TABLE,
            primary_key: M::PRIMARY_KEY,
            timestamps: M::TIMESTAMPS,
            created_at: M::CREATED_AT,
            updated_at: M::UPDATED_AT,
            soft_deletes: M::SOFT_DELETES,
            deleted_at: M::DELETED_AT,
            fillable: M::fillable,
            guarded: M::guarded,
            hidden: M::hidden,
            casts: M::casts,
            relation: M::relation,
        }
    }

    /// Returns the Rust type identity of the model.
    #[must_use]
    pub const fn id(&self) -> TypeId {
        self.id
    }

    /// Returns the hidden attribute list.
    #[must_use]
    pub fn hidden(&self) -> &'static [&'static str] {
        (self.hidden)()
    }

    /// Returns whether `fill` may assign `attribute`.
    #[must_use]
    pub fn is_fillable(&self, attribute: &str) -> bool {
        let fillable = (self.fillable)();
        if fillable.contains(&attribute) {
            return true;
        }
        let guarded = (self.guarded)();
        fillable.is_empty() && !guarded.contains(&"*") && !guarded.contains(&attribute)
    }

    /// Builds a fresh cast registry from the model's declarations.
    #[must_use]
    pub fn cast_registry(&self) -> Arc<CastRegistry> {
        Arc::new(CastRegistry::from_pairs((self.casts)()))
    }

    /// Looks up a relation by name.
    pub fn relation(&self, name: &str) -> Result<Relation> {
        (self.relation)(name).ok_or_else(|| OrmError::UnknownRelation {
            model: self.name,
            relation: name.to_string(),
        })
    }

    /// Prefixes `column` with the table name.
    #[must_use]
    pub fn qualified(&self, column: &str) -> String {
        format!("{}.{column}", self.table)
    }
}

/// Static API available on every model.
///
/// ```ignore
/// let john = User::create(&db, attributes! { "name" => "John" }).await?;
/// let found = User::find(&db, john.key().cloned()).await?;
/// let everyone = User::all(&db).await?;
/// ```
#[allow(async_fn_in_trait)]
pub trait ModelExt: Model {
    /// Returns the model's type token.
    fn model_type() -> ModelType {
        ModelType::of::<Self>()
    }

    /// Starts a query.
    fn query(db: &Database) -> Result<ModelQueryBuilder<'_>> {
        db.query::<Self>()
    }

    /// Finds a record by primary key.
    async fn find<V: ToValue>(db: &Database, id: V) -> Result<Option<Record>> {
        Self::query(db)?.find(id).await
    }

    /// Finds a record by primary key or fails with `NotFound`.
    async fn find_or_fail<V: ToValue>(db: &Database, id: V) -> Result<Record> {
        Self::query(db)?.find_or_fail(id).await
    }

    /// Loads every record.
    async fn all(db: &Database) -> Result<Vec<Record>> {
        Self::query(db)?.get().await
    }

    /// Mass-assigns `attributes` to a new record and saves it.
    async fn create<I, K, V>(db: &Database, attributes: I) -> Result<Record>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: ToValue,
    {
        Self::query(db)?.create(attributes).await
    }

    /// Builds an unsaved record from `attributes` (mass assignment rules apply).
    fn make<I, K, V>(attributes: I) -> Result<Record>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: ToValue,
    {
        let mut record = Record::new(Self::model_type());
        record.fill(attributes)?;
        Ok(record)
    }

    /// Wraps rows that already came from storage as existing, clean records.
    fn hydrate(rows: Vec<Row>) -> Vec<Record> {
        Record::hydrate_all(Self::model_type(), rows)
    }
}

impl<M: Model> ModelExt for M {}

#[cfg(test)]
mod tests {
    use super::*;

    struct Article;

    impl Model for Article {
        const NAME: &'static str = "Article";
        const TABLE: &'static str = "articles";

        fn fillable() -> &'static [&'static str] {
            &["title", "body"]
        }
    }

    struct Setting;

    impl Model for Setting {
        const NAME: &'static str = "Setting";
        const TABLE: &'static str = "settings";
        const TIMESTAMPS: bool = false;

        fn guarded() -> &'static [&'static str] {
            &["id", "secret"]
        }
    }

    struct Locked;

    impl Model for Locked {
        const NAME: &'static str = "Locked";
        const TABLE: &'static str = "locked";

        fn guarded() -> &'static [&'static str] {
            &["*"]
        }
    }

    #[test]
    fn test_fillable_allow_list() {
        let model = ModelType::of::<Article>();
        assert!(model.is_fillable("title"));
        assert!(!model.is_fillable("author_id"));
    }

    #[test]
    fn test_guarded_deny_list() {
        let model = ModelType::of::<Setting>();
        assert!(model.is_fillable("value"));
        assert!(!model.is_fillable("secret"));
        assert!(!ModelType::of::<Locked>().is_fillable("anything"));
    }

    #[test]
    fn test_type_token_identity() {
        assert_eq!(ModelType::of::<Article>(), Article::model_type());
        assert_ne!(ModelType::of::<Article>(), ModelType::of::<Setting>());
        assert!(!ModelType::of::<Setting>().timestamps);
    }

    #[test]
    fn test_unknown_relation() {
        let err = ModelType::of::<Article>().relation("comments").unwrap_err();
        assert!(err.to_string().contains("comments"));
    }

    #[test]
    fn test_make_applies_fillable() {
        let record = Article::make([("title", "Hello"), ("author_id", "9")]).unwrap();
        assert!(!record.exists());
        assert!(record.get_raw("title").is_some());
        assert!(record.get_raw("author_id").is_none());
    }
}
