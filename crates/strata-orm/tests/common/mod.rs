#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use sqlx::sqlite::SqlitePoolOptions;
use strata_orm::{
    BelongsTo, BelongsToMany, Cast, Database, HasMany, HasOne, Model, Relation, Row, Value,
};
use strata_sql_core::{BoxFuture, Dialect, Executor};
use strata_sql_sqlite::{SqliteDialect, SqliteExecutor};
use tracing_subscriber::EnvFilter;

pub const SCHEMA: &str = "
CREATE TABLE users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT,
    is_admin INTEGER NOT NULL DEFAULT 0,
    settings TEXT,
    password TEXT,
    created_at TEXT,
    updated_at TEXT
);
CREATE TABLE posts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER,
    title TEXT NOT NULL,
    body TEXT,
    published_at TEXT,
    created_at TEXT,
    updated_at TEXT,
    deleted_at TEXT
);
CREATE TABLE comments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    post_id INTEGER NOT NULL,
    user_id INTEGER,
    body TEXT NOT NULL,
    created_at TEXT,
    updated_at TEXT
);
CREATE TABLE profiles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    bio TEXT
);
CREATE TABLE roles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL
);
CREATE TABLE role_user (
    user_id INTEGER NOT NULL,
    role_id INTEGER NOT NULL,
    granted_by TEXT
);
CREATE TABLE authors (
    author_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL
);
CREATE TABLE books (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    author_ref INTEGER,
    title TEXT NOT NULL
);
CREATE TABLE author_role (
    author_ref INTEGER NOT NULL,
    role_id INTEGER NOT NULL
);
";

pub struct User;

impl Model for User {
    const NAME: &'static str = "User";
    const TABLE: &'static str = "users";

    fn fillable() -> &'static [&'static str] {
        &["name", "email", "is_admin", "settings"]
    }

    fn hidden() -> &'static [&'static str] {
        &["password"]
    }

    fn casts() -> Vec<(&'static str, Cast)> {
        vec![("is_admin", Cast::Boolean), ("settings", Cast::Json)]
    }

    fn relation(name: &str) -> Option<Relation> {
        match name {
            "posts" => Some(HasMany::new::<Post>("user_id").into()),
            "profile" => Some(HasOne::new::<Profile>("user_id").into()),
            "roles" => Some(
                BelongsToMany::new::<Role>("role_user", "user_id", "role_id")
                    .with_pivot(&["granted_by"])
                    .into(),
            ),
            _ => None,
        }
    }
}

pub struct Post;

impl Model for Post {
    const NAME: &'static str = "Post";
    const TABLE: &'static str = "posts";
    const SOFT_DELETES: bool = true;

    fn fillable() -> &'static [&'static str] {
        &["user_id", "title", "body", "published_at"]
    }

    fn relation(name: &str) -> Option<Relation> {
        match name {
            "user" => Some(BelongsTo::new::<User>("user_id").into()),
            "comments" => Some(HasMany::new::<Comment>("post_id").into()),
            _ => None,
        }
    }
}

pub struct Comment;

impl Model for Comment {
    const NAME: &'static str = "Comment";
    const TABLE: &'static str = "comments";

    fn fillable() -> &'static [&'static str] {
        &["post_id", "user_id", "body"]
    }

    fn relation(name: &str) -> Option<Relation> {
        match name {
            "author" => Some(BelongsTo::new::<User>("user_id").into()),
            _ => None,
        }
    }
}

pub struct Profile;

impl Model for Profile {
    const NAME: &'static str = "Profile";
    const TABLE: &'static str = "profiles";
    const TIMESTAMPS: bool = false;

    fn fillable() -> &'static [&'static str] {
        &["user_id", "bio"]
    }
}

pub struct Role;

impl Model for Role {
    const NAME: &'static str = "Role";
    const TABLE: &'static str = "roles";
    const TIMESTAMPS: bool = false;

    fn fillable() -> &'static [&'static str] {
        &["name"]
    }

    fn relation(name: &str) -> Option<Relation> {
        match name {
            "users" => Some(BelongsToMany::new::<User>("role_user", "role_id", "user_id").into()),
            _ => None,
        }
    }
}

/// Keyed by `author_id` rather than `id`.
pub struct Author;

impl Model for Author {
    const NAME: &'static str = "Author";
    const TABLE: &'static str = "authors";
    const PRIMARY_KEY: &'static str = "author_id";
    const TIMESTAMPS: bool = false;

    fn fillable() -> &'static [&'static str] {
        &["name"]
    }

    fn relation(name: &str) -> Option<Relation> {
        match name {
            "books" => Some(HasMany::new::<Book>("author_ref").into()),
            "roles" => {
                Some(BelongsToMany::new::<Role>("author_role", "author_ref", "role_id").into())
            }
            _ => None,
        }
    }
}

pub struct Book;

impl Model for Book {
    const NAME: &'static str = "Book";
    const TABLE: &'static str = "books";
    const TIMESTAMPS: bool = false;

    fn fillable() -> &'static [&'static str] {
        &["author_ref", "title"]
    }

    fn relation(name: &str) -> Option<Relation> {
        match name {
            "author" => Some(BelongsTo::new::<Author>("author_ref").into()),
            _ => None,
        }
    }
}

/// Wraps the SQLite executor and records every statement it runs.
pub struct CountingExecutor {
    inner: SqliteExecutor,
    log: Mutex<Vec<String>>,
}

impl CountingExecutor {
    pub fn new(inner: SqliteExecutor) -> Self {
        Self {
            inner,
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub fn selects(&self) -> usize {
        self.statements()
            .iter()
            .filter(|sql| sql.starts_with("SELECT"))
            .count()
    }

    pub fn writes(&self) -> usize {
        self.statements()
            .iter()
            .filter(|sql| {
                sql.starts_with("INSERT") || sql.starts_with("UPDATE") || sql.starts_with("DELETE")
            })
            .count()
    }

    pub fn reset(&self) {
        self.log.lock().unwrap().clear();
    }
}

impl Executor for CountingExecutor {
    fn dialect(&self) -> &dyn Dialect {
        self.inner.dialect()
    }

    fn raw<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, strata_sql_core::Result<Vec<Row>>> {
        self.log.lock().unwrap().push(sql.to_string());
        self.inner.raw(sql, params)
    }
}

/// Routes `tracing` output to the test harness; `RUST_LOG=strata_orm=debug`
/// shows the statements behind a failing test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn setup_with(dialect: SqliteDialect) -> (Database, Arc<CountingExecutor>) {
    init_tracing();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");
    let sqlite = SqliteExecutor::with_dialect(pool, dialect);
    sqlite
        .execute_script(SCHEMA)
        .await
        .expect("Failed to create schema");
    let counting = Arc::new(CountingExecutor::new(sqlite));
    let db = Database::new(counting.clone());
    (db, counting)
}

pub async fn setup() -> (Database, Arc<CountingExecutor>) {
    setup_with(SqliteDialect::new()).await
}

pub fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}
