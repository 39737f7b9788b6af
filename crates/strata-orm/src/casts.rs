//! Attribute casts.
//!
//! A cast converts between the storage form of an attribute (what the
//! executor binds and returns) and its in-memory form (what `Record::get`
//! hands out). Records always hold the storage form; reads deserialize,
//! writes serialize.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use strata_sql_core::{format_datetime, Value, DATETIME_FORMAT};

use crate::error::{OrmError, Result};

/// One direction of a custom cast.
pub type CastFn = Arc<dyn Fn(&Value) -> std::result::Result<Value, String> + Send + Sync>;

/// A bidirectional attribute transform.
#[derive(Clone)]
pub enum Cast {
    /// `bool` in memory, `0`/`1` in storage.
    Boolean,
    /// Integer in memory and in storage.
    Integer,
    /// Float in memory and in storage.
    Float,
    /// Structured JSON in memory, JSON text in storage.
    Json,
    /// Calendar date in memory, `YYYY-MM-DD` in storage.
    Date,
    /// UTC datetime in memory, `YYYY-MM-DD HH:MM:SS` in storage.
    DateTime,
    /// UTC datetime in memory, epoch milliseconds in storage.
    Timestamp,
    /// Caller-supplied transform pair.
    Custom {
        /// Name used in error messages.
        name: &'static str,
        /// In-memory to storage.
        serialize: CastFn,
        /// Storage to in-memory.
        deserialize: CastFn,
    },
}

impl fmt::Debug for Cast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cast({})", self.name())
    }
}

impl Cast {
    /// Looks up a built-in cast by type name.
    ///
    /// ```rust
    /// use strata_orm::Cast;
    ///
    /// assert!(matches!(Cast::from_name("bool"), Some(Cast::Boolean)));
    /// assert!(Cast::from_name("money").is_none());
    /// ```
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let cast = match name.to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Self::Boolean,
            "int" | "integer" => Self::Integer,
            "float" | "double" | "real" | "decimal" => Self::Float,
            "json" | "array" | "object" => Self::Json,
            "date" => Self::Date,
            "datetime" => Self::DateTime,
            "timestamp" => Self::Timestamp,
            _ => return None,
        };
        Some(cast)
    }

    /// Builds a custom cast from a pair of functions.
    pub fn custom<S, D>(name: &'static str, serialize: S, deserialize: D) -> Self
    where
        S: Fn(&Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
        D: Fn(&Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        Self::Custom {
            name,
            serialize: Arc::new(serialize),
            deserialize: Arc::new(deserialize),
        }
    }

    /// Returns the cast's name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Json => "json",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Timestamp => "timestamp",
            Self::Custom { name, .. } => *name,
        }
    }

    /// Converts an in-memory value into its storage form.
    ///
    /// NULL passes through every built-in cast unchanged.
    pub fn serialize(&self, value: &Value) -> std::result::Result<Value, String> {
        if let Self::Custom { serialize, .. } = self {
            return serialize(value);
        }
        if value.is_null() {
            return Ok(Value::Null);
        }
        match self {
            Self::Boolean => to_bool(value).map(|b| Value::Int(i64::from(b))),
            Self::Integer => to_int(value).map(Value::Int),
            Self::Float => to_float(value).map(Value::Float),
            Self::Json => match value {
                Value::Text(text) => serde_json::from_str::<serde_json::Value>(text)
                    .map(|_| value.clone())
                    .or_else(|_| Ok(Value::Text(value.to_json().to_string()))),
                other => Ok(Value::Text(other.to_json().to_string())),
            },
            Self::Date => to_date(value).map(|d| Value::Text(d.format("%Y-%m-%d").to_string())),
            Self::DateTime => to_datetime(value).map(|dt| Value::Text(format_datetime(&dt))),
            Self::Timestamp => match value {
                Value::Int(ms) => Ok(Value::Int(*ms)),
                other => to_datetime(other).map(|dt| Value::Int(dt.timestamp_millis())),
            },
            Self::Custom { .. } => Ok(value.clone()),
        }
    }

    /// Converts a stored value into its in-memory form.
    pub fn deserialize(&self, value: &Value) -> std::result::Result<Value, String> {
        if let Self::Custom { deserialize, .. } = self {
            return deserialize(value);
        }
        if value.is_null() {
            return Ok(Value::Null);
        }
        match self {
            Self::Boolean => to_bool(value).map(Value::Bool),
            Self::Integer => to_int(value).map(Value::Int),
            Self::Float => to_float(value).map(Value::Float),
            Self::Json => match value {
                Value::Json(json) => Ok(Value::Json(json.clone())),
                Value::Text(text) => serde_json::from_str(text)
                    .map(Value::Json)
                    .map_err(|err| format!("malformed JSON: {err}")),
                other => Ok(Value::Json(other.to_json())),
            },
            Self::Date => to_date(value).map(Value::Date),
            Self::DateTime => to_datetime(value).map(Value::DateTime),
            Self::Timestamp => match value {
                Value::DateTime(dt) => Ok(Value::DateTime(*dt)),
                other => {
                    let ms = to_int(other)?;
                    DateTime::from_timestamp_millis(ms)
                        .map(Value::DateTime)
                        .ok_or_else(|| format!("timestamp {ms} is out of range"))
                }
            },
            Self::Custom { .. } => Ok(value.clone()),
        }
    }
}

fn to_bool(value: &Value) -> std::result::Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Int(n) => Ok(*n != 0),
        Value::Float(f) => Ok(*f != 0.0),
        Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "t" | "yes" | "on" => Ok(true),
            "0" | "false" | "f" | "no" | "off" | "" => Ok(false),
            other => Err(format!("{other:?} is not a boolean")),
        },
        other => Err(format!("{other:?} is not a boolean")),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_int(value: &Value) -> std::result::Result<i64, String> {
    match value {
        Value::Float(f) if f.is_finite() => Ok(f.trunc() as i64),
        other => other
            .as_i64()
            .ok_or_else(|| format!("{other:?} is not an integer")),
    }
}

fn to_float(value: &Value) -> std::result::Result<f64, String> {
    value
        .as_f64()
        .ok_or_else(|| format!("{value:?} is not a number"))
}

fn to_date(value: &Value) -> std::result::Result<NaiveDate, String> {
    match value {
        Value::Date(d) => Ok(*d),
        Value::DateTime(dt) => Ok(dt.date_naive()),
        Value::Text(s) => {
            let s = s.trim();
            NaiveDate::parse_from_str(s.get(..10).unwrap_or(s), "%Y-%m-%d")
                .map_err(|err| format!("unparsable date {s:?}: {err}"))
        }
        other => Err(format!("{other:?} is not a date")),
    }
}

fn to_datetime(value: &Value) -> std::result::Result<DateTime<Utc>, String> {
    match value {
        Value::DateTime(dt) => Ok(*dt),
        Value::Date(d) => d
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
            .ok_or_else(|| format!("invalid date {d}")),
        Value::Int(ms) => DateTime::from_timestamp_millis(*ms)
            .ok_or_else(|| format!("timestamp {ms} is out of range")),
        Value::Text(s) => parse_datetime(s.trim()),
        other => Err(format!("{other:?} is not a datetime")),
    }
}

fn parse_datetime(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in [DATETIME_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(format!("unparsable datetime {s:?}"))
}

/// Casts keyed by attribute name.
#[derive(Debug, Clone, Default)]
pub struct CastRegistry {
    casts: HashMap<String, Cast>,
}

impl CastRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from `(attribute, cast)` pairs.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Cast)>,
        K: Into<String>,
    {
        Self {
            casts: pairs.into_iter().map(|(k, c)| (k.into(), c)).collect(),
        }
    }

    /// Registers or replaces the cast for an attribute.
    pub fn register(&mut self, attribute: impl Into<String>, cast: Cast) {
        self.casts.insert(attribute.into(), cast);
    }

    /// Returns the cast for an attribute.
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&Cast> {
        self.casts.get(attribute)
    }

    /// Converts an in-memory value for `attribute` into storage form.
    pub fn serialize(&self, attribute: &str, value: Value) -> Result<Value> {
        match self.casts.get(attribute) {
            Some(cast) => cast
                .serialize(&value)
                .map_err(|message| cast_error(attribute, cast, message)),
            None => Ok(value),
        }
    }

    /// Converts a stored value for `attribute` into its in-memory form.
    pub fn deserialize(&self, attribute: &str, value: &Value) -> Result<Value> {
        match self.casts.get(attribute) {
            Some(cast) => cast
                .deserialize(value)
                .map_err(|message| cast_error(attribute, cast, message)),
            None => Ok(value.clone()),
        }
    }
}

fn cast_error(attribute: &str, cast: &Cast, message: String) -> OrmError {
    OrmError::Cast {
        attribute: attribute.to_string(),
        cast: cast.name().to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_boolean_round_trip() {
        let cast = Cast::Boolean;
        assert_eq!(cast.serialize(&Value::Bool(true)).unwrap(), Value::Int(1));
        assert_eq!(cast.deserialize(&Value::Int(0)).unwrap(), Value::Bool(false));
        assert_eq!(
            cast.deserialize(&Value::Text("true".into())).unwrap(),
            Value::Bool(true)
        );
        assert!(cast.deserialize(&Value::Text("maybe".into())).is_err());
    }

    #[test]
    fn test_numeric_casts_accept_text() {
        assert_eq!(
            Cast::Integer.deserialize(&Value::Text("42".into())).unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            Cast::Float.serialize(&Value::Int(2)).unwrap(),
            Value::Float(2.0)
        );
    }

    #[test]
    fn test_json_cast() {
        let stored = Cast::Json
            .serialize(&Value::Json(json!({"tags": ["a", "b"]})))
            .unwrap();
        assert_eq!(stored, Value::Text(r#"{"tags":["a","b"]}"#.into()));
        assert_eq!(
            Cast::Json.deserialize(&stored).unwrap(),
            Value::Json(json!({"tags": ["a", "b"]}))
        );
    }

    #[test]
    fn test_malformed_json_is_a_cast_error() {
        let registry = CastRegistry::from_pairs([("meta", Cast::Json)]);
        let err = registry
            .deserialize("meta", &Value::Text("{not json".into()))
            .unwrap_err();
        assert!(matches!(err, OrmError::Cast { ref attribute, .. } if attribute == "meta"));
    }

    #[test]
    fn test_datetime_cast_formats() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let stored = Cast::DateTime.serialize(&Value::DateTime(dt)).unwrap();
        assert_eq!(stored, Value::Text("2024-03-01 12:30:00".into()));
        assert_eq!(Cast::DateTime.deserialize(&stored).unwrap(), Value::DateTime(dt));
        assert_eq!(
            Cast::DateTime
                .deserialize(&Value::Text("2024-03-01T12:30:00Z".into()))
                .unwrap(),
            Value::DateTime(dt)
        );
        assert!(Cast::DateTime
            .deserialize(&Value::Text("yesterday".into()))
            .is_err());
    }

    #[test]
    fn test_timestamp_is_epoch_millis() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let stored = Cast::Timestamp.serialize(&Value::DateTime(dt)).unwrap();
        assert_eq!(stored, Value::Int(dt.timestamp_millis()));
        assert_eq!(Cast::Timestamp.deserialize(&stored).unwrap(), Value::DateTime(dt));
    }

    #[test]
    fn test_date_cast() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(
            Cast::Date
                .deserialize(&Value::Text("2024-02-29 10:00:00".into()))
                .unwrap(),
            Value::Date(d)
        );
    }

    #[test]
    fn test_null_passes_through() {
        for cast in [Cast::Boolean, Cast::Json, Cast::Timestamp, Cast::Date] {
            assert_eq!(cast.serialize(&Value::Null).unwrap(), Value::Null);
            assert_eq!(cast.deserialize(&Value::Null).unwrap(), Value::Null);
        }
    }

    #[test]
    fn test_custom_cast() {
        let upper = Cast::custom(
            "upper",
            |v| Ok(Value::Text(v.as_str().unwrap_or_default().to_uppercase())),
            |v| Ok(v.clone()),
        );
        assert_eq!(
            upper.serialize(&Value::Text("abc".into())).unwrap(),
            Value::Text("ABC".into())
        );
        assert_eq!(upper.name(), "upper");
    }

    #[test]
    fn test_uncast_attributes_pass_through() {
        let registry = CastRegistry::new();
        assert_eq!(
            registry.serialize("name", Value::Text("x".into())).unwrap(),
            Value::Text("x".into())
        );
    }
}
