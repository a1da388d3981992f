use std::cmp::Ordering;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;

use crate::error::{QuarryError, Result};

/// Storage format used for date/time attributes and date bindings.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single database row: ordered column name to value.
pub type Row = IndexMap<String, Value>;

/// A scalar moving between Rust and the database.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Value::Text(v) => v.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Text(v) => v.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::Int(v) => Some(*v != 0),
            Value::Float(v) => Some(*v != 0.0),
            Value::Text(v) => match v.trim() {
                "" | "0" | "false" => Some(false),
                _ => Some(true),
            },
            Value::Null => None,
            _ => Some(true),
        }
    }

    /// Parses text in the storage format (or an ISO-8601 variant) into a date-time.
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(v) => Some(*v),
            Value::Date(v) => Some(v.and_time(NaiveTime::MIN)),
            Value::Int(v) => chrono::DateTime::from_timestamp(*v, 0).map(|dt| dt.naive_utc()),
            Value::Text(v) => parse_datetime(v),
            _ => None,
        }
    }

    /// Normalized dictionary key used when matching rows to parents.
    ///
    /// Integers and their textual forms collide so that `1` and `"1"` match,
    /// mirroring how loosely typed stores hand keys back.
    pub fn to_key(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Int(v) => Some(v.to_string()),
            Value::Bool(v) => Some(i64::from(*v).to_string()),
            Value::Float(v) if v.fract() == 0.0 => Some((*v as i64).to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::Text(v) => Some(v.clone()),
            Value::Bytes(v) => Some(String::from_utf8_lossy(v).into_owned()),
            Value::Json(v) => Some(v.to_string()),
            Value::Date(v) => Some(v.format("%Y-%m-%d").to_string()),
            Value::DateTime(v) => Some(v.format(DATE_FORMAT).to_string()),
        }
    }

    /// Equality used by dirty tracking: numeric strings compare numerically,
    /// booleans compare with 0/1, JSON compares structurally.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Json(a), Value::Text(b)) | (Value::Text(b), Value::Json(a)) => {
                serde_json::from_str::<serde_json::Value>(b).is_ok_and(|b| &b == a)
            }
            (Value::Text(a), Value::Text(b)) => {
                match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
                    (Ok(a), Ok(b)) => a == b,
                    _ => false,
                }
            }
            (Value::Date(_) | Value::DateTime(_), _) | (_, Value::Date(_) | Value::DateTime(_)) => {
                match (self.as_datetime(), other.as_datetime()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Converts the value into the shape every driver accepts as a binding.
    pub fn normalize_binding(self, date_format: &str) -> Value {
        match self {
            Value::Bool(v) => Value::Int(i64::from(v)),
            Value::Date(v) => Value::Text(v.format("%Y-%m-%d").to_string()),
            Value::DateTime(v) => Value::Text(v.format(date_format).to_string()),
            Value::Json(v) => Value::Text(v.to_string()),
            other => other,
        }
    }

    /// Renders the value as a SQL literal for logs and error messages.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "null".to_owned(),
            Value::Bool(v) => i64::from(*v).to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Text(v) => format!("'{}'", v.replace('\'', "''")),
            Value::Bytes(v) => format!("<{} bytes>", v.len()),
            Value::Json(v) => format!("'{}'", v.to_string().replace('\'', "''")),
            Value::Date(v) => format!("'{}'", v.format("%Y-%m-%d")),
            Value::DateTime(v) => format!("'{}'", v.format(DATE_FORMAT)),
        }
    }

    /// Converts the value into JSON for serialization.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(v) => serde_json::Value::Bool(*v),
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(v) => serde_json::Value::String(v.clone()),
            Value::Bytes(v) => serde_json::Value::String(String::from_utf8_lossy(v).into_owned()),
            Value::Json(v) => v.clone(),
            Value::Date(v) => serde_json::Value::String(v.format("%Y-%m-%d").to_string()),
            Value::DateTime(v) => {
                serde_json::Value::String(v.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string())
            }
        }
    }

    /// Converts JSON into the closest scalar; arrays and objects stay JSON.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(v) => Value::Bool(v),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(v) => Value::Int(v),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(v) => Value::Text(v),
            other => Value::Json(other),
        }
    }

    /// Ordering used to produce stable key lists for `IN` constraints.
    pub(crate) fn key_cmp(&self, other: &Value) -> Ordering {
        match (self.as_i64(), other.as_i64()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => self.to_key().cmp(&other.to_key()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(v) => f.write_str(v),
            other => f.write_str(&other.to_sql_literal()),
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serde::Serialize::serialize(&self.to_json(), serializer)
    }
}

pub(crate) fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    const FORMATS: [&str; 4] = [
        DATE_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.fZ",
    ];
    for format in FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed);
        }
    }
    if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(parsed.naive_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN))
}

/// Returns the non-null keys sorted and de-duplicated.
pub(crate) fn unique_sorted_keys(values: impl IntoIterator<Item = Value>) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    let mut keys: Vec<Value> = values
        .into_iter()
        .filter(|value| match value.to_key() {
            Some(key) => seen.insert(key),
            None => false,
        })
        .collect();
    keys.sort_by(Value::key_cmp);
    keys
}

macro_rules! value_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Value::Int(i64::from(value))
            }
        })*
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Int(value as i64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(f64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::Text(value.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::Json(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for Value {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        Value::DateTime(value.naive_utc())
    }
}

impl From<uuid::Uuid> for Value {
    fn from(value: uuid::Uuid) -> Self {
        Value::Text(value.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// A value operand that may also be a raw SQL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Value(Value),
    Raw(String),
}

/// Marks a fragment of SQL that must be embedded verbatim instead of bound.
pub fn raw(sql: impl Into<String>) -> Expr {
    Expr::Raw(sql.into())
}

impl Expr {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Expr::Value(v) => Some(v),
            Expr::Raw(_) => None,
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Value(value)
    }
}

macro_rules! expr_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Expr {
            fn from(value: $ty) -> Self {
                Expr::Value(Value::from(value))
            }
        })*
    };
}

expr_from!(
    i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64, bool, String, &str, &String,
    Vec<u8>, serde_json::Value, NaiveDate, NaiveDateTime, uuid::Uuid
);

impl From<chrono::DateTime<chrono::Utc>> for Expr {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        Expr::Value(Value::from(value))
    }
}

impl<T: Into<Value>> From<Option<T>> for Expr {
    fn from(value: Option<T>) -> Self {
        Expr::Value(Value::from(value))
    }
}

/// Column-to-operand map used by inserts and updates.
pub type Record = IndexMap<String, Expr>;

/// Builds a [`Record`] from `(column, value)` pairs.
pub fn record<I, K, V>(pairs: I) -> Record
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Expr>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}

/// Conversion from a database value into a Rust type.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

fn conversion(expected: &str, value: &Value) -> QuarryError {
    QuarryError::Conversion {
        key: String::new(),
        message: format!("expected {expected}, found {}", value.to_sql_literal()),
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self> {
        value.as_i64().ok_or_else(|| conversion("integer", &value))
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide).map_err(|_| conversion("32-bit integer", &Value::Int(wide)))
    }
}

impl FromValue for u64 {
    fn from_value(value: Value) -> Result<Self> {
        let wide = i64::from_value(value)?;
        u64::try_from(wide).map_err(|_| conversion("unsigned integer", &Value::Int(wide)))
    }
}

impl FromValue for u32 {
    fn from_value(value: Value) -> Result<Self> {
        let wide = i64::from_value(value)?;
        u32::try_from(wide).map_err(|_| conversion("unsigned integer", &Value::Int(wide)))
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self> {
        value.as_f64().ok_or_else(|| conversion("number", &value))
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self> {
        f64::from_value(value).map(|v| v as f32)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| conversion("boolean", &value))
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Text(v) => Ok(v),
            Value::Null => Err(conversion("string", &Value::Null)),
            other => Ok(other.to_string()),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bytes(v) => Ok(v),
            Value::Text(v) => Ok(v.into_bytes()),
            other => Err(conversion("bytes", &other)),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Json(v) => Ok(v),
            Value::Text(v) => Ok(serde_json::from_str(&v)?),
            other => Ok(other.to_json()),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: Value) -> Result<Self> {
        value.as_datetime().ok_or_else(|| conversion("date-time", &value))
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Date(v) => Ok(v),
            other => other
                .as_datetime()
                .map(|dt| dt.date())
                .ok_or_else(|| conversion("date", &other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_collide_across_int_and_text() {
        assert_eq!(Value::Int(10).to_key(), Value::from("10").to_key());
        assert_eq!(Value::Null.to_key(), None);
    }

    #[test]
    fn loose_equality_for_dirty_checks() {
        assert!(Value::from("1").loosely_equals(&Value::Int(1)));
        assert!(Value::Bool(true).loosely_equals(&Value::Int(1)));
        assert!(Value::from("1.50").loosely_equals(&Value::from("1.5")));
        assert!(!Value::from("abc").loosely_equals(&Value::from("abd")));
        assert!(!Value::Null.loosely_equals(&Value::Int(0)));
        assert!(
            Value::Json(serde_json::json!({"a": 1}))
                .loosely_equals(&Value::from("{\"a\":1}"))
        );
    }

    #[test]
    fn bindings_are_normalized() {
        assert_eq!(Value::Bool(true).normalize_binding(DATE_FORMAT), Value::Int(1));
        let dt = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        assert_eq!(
            Value::DateTime(dt).normalize_binding(DATE_FORMAT),
            Value::from("2024-05-01 08:30:00")
        );
    }

    #[test]
    fn unique_sorted_keys_drops_nulls_and_duplicates() {
        let keys = unique_sorted_keys(vec![
            Value::Int(3),
            Value::Null,
            Value::Int(1),
            Value::from("3"),
            Value::Int(2),
        ]);
        assert_eq!(keys, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn from_value_handles_options_and_text_numbers() {
        assert_eq!(i64::from_value(Value::from("42")).unwrap(), 42);
        assert_eq!(Option::<i64>::from_value(Value::Null).unwrap(), None);
        assert!(i32::from_value(Value::from("x")).is_err());
    }

    #[test]
    fn parses_storage_and_iso_dates() {
        assert!(parse_datetime("2024-01-02 03:04:05").is_some());
        assert!(parse_datetime("2024-01-02T03:04:05.000000Z").is_some());
        assert!(parse_datetime("2024-01-02").is_some());
        assert!(parse_datetime("yesterday").is_none());
    }
}
