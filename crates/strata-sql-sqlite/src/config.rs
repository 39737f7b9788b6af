//! Connection configuration.

use serde::Deserialize;
use sqlx::sqlite::SqlitePoolOptions;
use thiserror::Error;
use tracing::{debug, warn};

use strata_sql_core::QueryError;

use crate::dialect::SqliteDialect;
use crate::executor::SqliteExecutor;

/// Errors raised while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held an unparsable value.
    #[error("invalid value {value:?} for {name}")]
    InvalidVar {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
    },
}

/// How to reach a SQLite database.
///
/// Deserializable from any serde source; missing fields take their defaults.
///
/// ```rust
/// use strata_sql_sqlite::SqliteConfig;
///
/// let config = SqliteConfig::default();
/// assert_eq!(config.url, "sqlite::memory:");
/// assert_eq!(config.max_connections, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Connection URL.
    pub url: String,
    /// Pool size.
    pub max_connections: u32,
    /// Whether to use RETURNING on writes (SQLite 3.35.0+).
    pub returning: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            url: String::from("sqlite::memory:"),
            max_connections: 1,
            returning: true,
        }
    }
}

impl SqliteConfig {
    /// Reads `DATABASE_URL`, `STRATA_MAX_CONNECTIONS` and
    /// `STRATA_SQLITE_RETURNING`, falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(url) = lookup("DATABASE_URL") {
            config.url = url;
        }
        if let Some(value) = lookup("STRATA_MAX_CONNECTIONS") {
            config.max_connections = value.trim().parse().map_err(|_| ConfigError::InvalidVar {
                name: "STRATA_MAX_CONNECTIONS",
                value,
            })?;
        }
        if let Some(value) = lookup("STRATA_SQLITE_RETURNING") {
            config.returning = parse_flag(&value).ok_or(ConfigError::InvalidVar {
                name: "STRATA_SQLITE_RETURNING",
                value,
            })?;
        }
        Ok(config)
    }

    /// Returns the dialect this configuration selects.
    #[must_use]
    pub const fn dialect(&self) -> SqliteDialect {
        if self.returning {
            SqliteDialect::new()
        } else {
            SqliteDialect::legacy()
        }
    }

    /// Opens a pool and wraps it in an executor.
    pub async fn connect(&self) -> Result<SqliteExecutor, QueryError> {
        if !self.returning && self.max_connections > 1 {
            warn!(
                max_connections = self.max_connections,
                "legacy inserts read last_insert_rowid() on a pooled connection; \
                 generated keys may come from another session"
            );
        }
        debug!(url = %self.url, max_connections = self.max_connections, "connecting");
        let pool = SqlitePoolOptions::new()
            .max_connections(self.max_connections.max(1))
            .connect(&self.url)
            .await
            .map_err(QueryError::database)?;
        Ok(SqliteExecutor::with_dialect(pool, self.dialect()))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
