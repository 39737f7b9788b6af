//! SQL values and parameter handling.
//!
//! Every value that reaches a statement travels as a bound parameter. The
//! richer variants (`Json`, `Date`, `DateTime`) are the in-memory side of
//! attribute casts; executors bind them in their textual storage form.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

/// A SQL value that can be used as a parameter or read back from a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// Text value.
    Text(String),
    /// Binary blob value.
    Blob(Vec<u8>),
    /// Structured JSON value.
    Json(serde_json::Value),
    /// Calendar date.
    Date(NaiveDate),
    /// Point in time (UTC).
    DateTime(DateTime<Utc>),
}

/// Hashable identity of a non-null value.
///
/// Used to group rows by key when matching eager-loaded children onto their
/// parents. Integral floats and booleans collapse onto integers so that keys
/// coming back from different drivers still line up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupKey {
    /// Integer-like key.
    Int(i64),
    /// Text-like key.
    Text(String),
    /// Binary key.
    Blob(Vec<u8>),
}

impl Value {
    /// Returns true for `Value::Null`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the value as an integer when it has an integral reading.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns the value as a float when it has a numeric reading.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns the text content of a `Text` value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Interprets the value as a truth value (SQL style: non-zero is true).
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Float(f) => *f != 0.0,
            Self::Text(s) => !matches!(s.trim(), "" | "0" | "false" | "f"),
            Self::Blob(b) => !b.is_empty(),
            Self::Json(v) => !v.is_null(),
            Self::Date(_) | Self::DateTime(_) => true,
        }
    }

    /// Returns the grouping key for this value, or `None` for NULL.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn group_key(&self) -> Option<GroupKey> {
        match self {
            Self::Null => None,
            Self::Bool(b) => Some(GroupKey::Int(i64::from(*b))),
            Self::Int(n) => Some(GroupKey::Int(*n)),
            Self::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(GroupKey::Int(*f as i64)),
            Self::Float(f) => Some(GroupKey::Text(f.to_string())),
            Self::Text(s) => Some(GroupKey::Text(s.clone())),
            Self::Blob(b) => Some(GroupKey::Blob(b.clone())),
            Self::Json(v) => Some(GroupKey::Text(v.to_string())),
            Self::Date(d) => Some(GroupKey::Text(d.to_string())),
            Self::DateTime(dt) => Some(GroupKey::Text(format_datetime(dt))),
        }
    }

    /// Projects the value into JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(n) => serde_json::Value::from(*n),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Blob(b) => serde_json::Value::from(b.clone()),
            Self::Json(v) => v.clone(),
            Self::Date(d) => serde_json::Value::String(d.to_string()),
            Self::DateTime(dt) => {
                serde_json::Value::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
        }
    }

    /// Returns the representation executors bind for the non-native variants.
    ///
    /// Native variants are returned unchanged.
    #[must_use]
    pub fn into_storage(self) -> Self {
        match self {
            Self::Json(v) => Self::Text(v.to_string()),
            Self::Date(d) => Self::Text(d.format("%Y-%m-%d").to_string()),
            Self::DateTime(dt) => Self::Text(format_datetime(&dt)),
            other => other,
        }
    }
}

/// Storage format for datetimes, matching SQLite's `CURRENT_TIMESTAMP`.
///
/// Bound parameters and stored timestamps share it so text comparisons on
/// datetime columns order correctly.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Formats a timestamp in [`DATETIME_FORMAT`].
#[must_use]
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Trait for types that can be converted to SQL values.
pub trait ToValue {
    /// Converts the value to a `Value`.
    fn to_value(self) -> Value;
}

impl ToValue for Value {
    fn to_value(self) -> Value {
        self
    }
}

impl ToValue for &Value {
    fn to_value(self) -> Value {
        self.clone()
    }
}

impl ToValue for bool {
    fn to_value(self) -> Value {
        Value::Bool(self)
    }
}

impl ToValue for i64 {
    fn to_value(self) -> Value {
        Value::Int(self)
    }
}

impl ToValue for i32 {
    fn to_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl ToValue for i16 {
    fn to_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl ToValue for u32 {
    fn to_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl ToValue for u16 {
    fn to_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl ToValue for u8 {
    fn to_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl ToValue for f64 {
    fn to_value(self) -> Value {
        Value::Float(self)
    }
}

impl ToValue for f32 {
    fn to_value(self) -> Value {
        Value::Float(f64::from(self))
    }
}

impl ToValue for String {
    fn to_value(self) -> Value {
        Value::Text(self)
    }
}

impl ToValue for &String {
    fn to_value(self) -> Value {
        Value::Text(self.clone())
    }
}

impl ToValue for &str {
    fn to_value(self) -> Value {
        Value::Text(String::from(self))
    }
}

impl ToValue for Vec<u8> {
    fn to_value(self) -> Value {
        Value::Blob(self)
    }
}

impl ToValue for &[u8] {
    fn to_value(self) -> Value {
        Value::Blob(self.to_vec())
    }
}

impl ToValue for serde_json::Value {
    fn to_value(self) -> Value {
        Value::Json(self)
    }
}

impl ToValue for NaiveDate {
    fn to_value(self) -> Value {
        Value::Date(self)
    }
}

impl ToValue for DateTime<Utc> {
    fn to_value(self) -> Value {
        Value::DateTime(self)
    }
}

impl ToValue for NaiveDateTime {
    fn to_value(self) -> Value {
        Value::DateTime(self.and_utc())
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_value_conversions() {
        assert_eq!(true.to_value(), Value::Bool(true));
        assert_eq!(42_i32.to_value(), Value::Int(42));
        assert_eq!(2.5_f64.to_value(), Value::Float(2.5));
        assert_eq!("hello".to_value(), Value::Text(String::from("hello")));
        assert_eq!(None::<i32>.to_value(), Value::Null);
        assert_eq!(Some(42_i32).to_value(), Value::Int(42));
    }

    #[test]
    fn test_group_key_collapses_numeric_forms() {
        assert_eq!(Value::Int(3).group_key(), Value::Float(3.0).group_key());
        assert_eq!(Value::Bool(true).group_key(), Some(GroupKey::Int(1)));
        assert_eq!(Value::Null.group_key(), None);
        assert_ne!(Value::Int(3).group_key(), Value::Text("3".into()).group_key());
    }

    #[test]
    fn test_numeric_readings() {
        assert_eq!(Value::Text(" 12 ".into()).as_i64(), Some(12));
        assert_eq!(Value::Float(1.5).as_i64(), None);
        assert_eq!(Value::Int(2).as_f64(), Some(2.0));
        assert!(!Value::Text("0".into()).is_truthy());
        assert!(Value::Int(7).is_truthy());
    }

    #[test]
    fn test_into_storage() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(
            Value::Date(date).into_storage(),
            Value::Text("2024-01-15".into())
        );
        assert_eq!(
            Value::Json(serde_json::json!({"a": 1})).into_storage(),
            Value::Text(r#"{"a":1}"#.into())
        );
        assert_eq!(Value::Int(1).into_storage(), Value::Int(1));
    }

    #[test]
    fn test_datetime_binds_in_storage_format() {
        let dt = date_time(2024, 5, 6, 7, 8, 9);
        assert_eq!(
            Value::DateTime(dt).into_storage(),
            Value::Text("2024-05-06 07:08:09".into())
        );
        assert_eq!(
            Value::DateTime(dt).group_key(),
            Value::Text("2024-05-06 07:08:09".into()).group_key()
        );
        assert_eq!(
            Value::DateTime(dt).to_json(),
            serde_json::Value::String("2024-05-06T07:08:09Z".into())
        );
    }

    #[test]
    fn test_same_day_datetimes_order_as_text() {
        let earlier = format_datetime(&date_time(2024, 5, 6, 7, 0, 0));
        let later = format_datetime(&date_time(2024, 5, 6, 19, 30, 0));
        assert!(earlier < later);
    }

    fn date_time(y: i32, m: u32, d: u32, h: u32, min: u32, sec: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(h, min, sec))
            .unwrap()
            .and_utc()
    }

    #[test]
    fn test_json_projection() {
        assert_eq!(Value::Float(f64::NAN).to_json(), serde_json::Value::Null);
        assert_eq!(
            serde_json::to_string(&Value::Text("x".into())).unwrap(),
            "\"x\""
        );
    }
}
