use std::fmt;
use std::str::FromStr;

use crate::error::{QuarryError, Result};
use crate::value::{DATE_FORMAT, Value};

/// Declared attribute cast.
///
/// Reading an attribute converts the stored value with [`Cast::get`]; JSON
/// and date casts also normalize on write with [`Cast::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cast {
    Int,
    Float,
    /// Fixed number of decimal places, read back as text.
    Decimal(u32),
    Bool,
    String,
    Json,
    Array,
    Collection,
    Date,
    DateTime,
    /// Unix seconds.
    Timestamp,
}

impl Cast {
    pub fn is_json(self) -> bool {
        matches!(self, Cast::Json | Cast::Array | Cast::Collection)
    }

    pub fn is_date(self) -> bool {
        matches!(self, Cast::Date | Cast::DateTime | Cast::Timestamp)
    }

    /// Converts a stored value into its cast form. `Null` is never cast.
    pub fn get(self, value: Value) -> Value {
        if value.is_null() {
            return value;
        }
        match self {
            Cast::Int => Value::Int(value.as_i64().unwrap_or(0)),
            Cast::Float => Value::Float(value.as_f64().unwrap_or(0.0)),
            Cast::Decimal(places) => {
                let number = value.as_f64().unwrap_or(0.0);
                Value::Text(format!("{number:.prec$}", prec = places as usize))
            }
            Cast::Bool => Value::Bool(value.as_bool().unwrap_or(false)),
            Cast::String => match value {
                Value::Text(_) => value,
                other => Value::Text(other.to_string()),
            },
            Cast::Json | Cast::Array | Cast::Collection => match value {
                Value::Json(_) => value,
                Value::Text(text) => serde_json::from_str(&text)
                    .map(Value::Json)
                    .unwrap_or(Value::Null),
                other => Value::Json(other.to_json()),
            },
            Cast::Date => value
                .as_datetime()
                .map(|dt| Value::Date(dt.date()))
                .unwrap_or(value),
            Cast::DateTime => value.as_datetime().map(Value::DateTime).unwrap_or(value),
            Cast::Timestamp => value
                .as_datetime()
                .map(|dt| Value::Int(dt.and_utc().timestamp()))
                .unwrap_or(value),
        }
    }

    /// Converts a value into its storage form.
    pub fn set(self, key: &str, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(value);
        }
        if self.is_json() {
            let encoded = match value {
                Value::Json(json) => json.to_string(),
                Value::Text(text) => serde_json::to_string(&text)?,
                other => other.to_json().to_string(),
            };
            return Ok(Value::Text(encoded));
        }
        if self.is_date() {
            return storage_date(key, &value);
        }
        Ok(value)
    }
}

/// Formats a date-like value in the storage format.
pub(crate) fn storage_date(key: &str, value: &Value) -> Result<Value> {
    value
        .as_datetime()
        .map(|dt| Value::Text(dt.format(DATE_FORMAT).to_string()))
        .ok_or_else(|| QuarryError::Conversion {
            key: key.to_owned(),
            message: format!("{} is not a date", value.to_sql_literal()),
        })
}

impl FromStr for Cast {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        if let Some(places) = lower.strip_prefix("decimal:") {
            let places = places
                .parse()
                .map_err(|_| QuarryError::Config(format!("invalid decimal cast [{s}]")))?;
            return Ok(Cast::Decimal(places));
        }
        Ok(match lower.as_str() {
            "int" | "integer" => Cast::Int,
            "real" | "float" | "double" => Cast::Float,
            "decimal" => Cast::Decimal(2),
            "bool" | "boolean" => Cast::Bool,
            "string" => Cast::String,
            "json" | "object" => Cast::Json,
            "array" => Cast::Array,
            "collection" => Cast::Collection,
            "date" => Cast::Date,
            "datetime" => Cast::DateTime,
            "timestamp" => Cast::Timestamp,
            _ => return Err(QuarryError::Config(format!("unknown cast [{s}]"))),
        })
    }
}

impl fmt::Display for Cast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cast::Int => f.write_str("int"),
            Cast::Float => f.write_str("float"),
            Cast::Decimal(places) => write!(f, "decimal:{places}"),
            Cast::Bool => f.write_str("bool"),
            Cast::String => f.write_str("string"),
            Cast::Json => f.write_str("json"),
            Cast::Array => f.write_str("array"),
            Cast::Collection => f.write_str("collection"),
            Cast::Date => f.write_str("date"),
            Cast::DateTime => f.write_str("datetime"),
            Cast::Timestamp => f.write_str("timestamp"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cast_names() {
        assert_eq!("integer".parse::<Cast>().unwrap(), Cast::Int);
        assert_eq!("decimal:3".parse::<Cast>().unwrap(), Cast::Decimal(3));
        assert!("money".parse::<Cast>().is_err());
        assert_eq!(Cast::Decimal(3).to_string(), "decimal:3");
    }

    #[test]
    fn reads_apply_cast() {
        assert_eq!(Cast::Int.get(Value::from("42")), Value::Int(42));
        assert_eq!(Cast::Bool.get(Value::Int(0)), Value::Bool(false));
        assert_eq!(Cast::Decimal(2).get(Value::Float(1.5)), Value::from("1.50"));
        assert_eq!(
            Cast::Json.get(Value::from("{\"a\":1}")),
            Value::Json(serde_json::json!({"a": 1}))
        );
        assert_eq!(Cast::Int.get(Value::Null), Value::Null);
        assert_eq!(
            Cast::Timestamp.get(Value::from("1970-01-01 00:01:00")),
            Value::Int(60)
        );
    }

    #[test]
    fn writes_encode_json_and_dates() {
        assert_eq!(
            Cast::Array
                .set("tags", Value::Json(serde_json::json!(["a", "b"])))
                .unwrap(),
            Value::from("[\"a\",\"b\"]")
        );
        assert_eq!(
            Cast::DateTime
                .set("seen", Value::from("2024-03-04T05:06:07Z"))
                .unwrap(),
            Value::from("2024-03-04 05:06:07")
        );
        assert!(Cast::Date.set("seen", Value::from("soon")).is_err());
    }
}
