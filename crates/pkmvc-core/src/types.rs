//! SQL type definitions and value coercion.

use crate::Result;
use crate::error::Error;
use crate::value::Value;

/// Storage type hints for direct fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    BigInt,
    Boolean,
    Double,
    Char(u32),
    VarChar(u32),
    Text,
    Blob,
    Json,
    DateTime,
}

impl SqlType {
    /// Get the SQL type name for this type.
    pub fn sql_name(&self) -> String {
        match self {
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::Double => "DOUBLE".to_string(),
            SqlType::Char(len) => format!("CHAR({})", len),
            SqlType::VarChar(len) => format!("VARCHAR({})", len),
            SqlType::Text => "TEXT".to_string(),
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Json => "JSON".to_string(),
            SqlType::DateTime => "DATETIME".to_string(),
        }
    }

    /// Maximum character length, for sized string types.
    pub const fn max_length(&self) -> Option<u32> {
        match self {
            SqlType::Char(len) | SqlType::VarChar(len) => Some(*len),
            _ => None,
        }
    }

    /// Normalize a value into the canonical variant for this type.
    ///
    /// Storage drivers and form input disagree on representation (SQLite
    /// hands back integers for booleans, forms send numbers as strings), so
    /// every value is coerced before it is stored on an entity. `NULL` is
    /// always accepted; nullability is enforced by the store.
    pub fn coerce(&self, field: &str, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        let coerced = match self {
            SqlType::Integer | SqlType::BigInt => match value {
                Value::BigInt(v) => Some(Value::BigInt(v)),
                Value::Bool(b) => Some(Value::BigInt(i64::from(b))),
                #[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
                Value::Double(d) if d.fract() == 0.0 && d.abs() < 9.0e15 => {
                    Some(Value::BigInt(d as i64))
                }
                Value::Text(ref s) if s.trim().is_empty() => Some(Value::Null),
                Value::Text(ref s) => s.trim().parse::<i64>().ok().map(Value::BigInt),
                _ => None,
            },
            SqlType::Boolean => match value {
                Value::Bool(b) => Some(Value::Bool(b)),
                Value::BigInt(v) => Some(Value::Bool(v != 0)),
                Value::Text(ref s) => match s.trim().to_ascii_lowercase().as_str() {
                    "1" | "true" | "on" | "yes" => Some(Value::Bool(true)),
                    "" | "0" | "false" | "off" | "no" => Some(Value::Bool(false)),
                    _ => None,
                },
                _ => None,
            },
            SqlType::Double => match value {
                Value::Double(d) => Some(Value::Double(d)),
                #[allow(clippy::cast_precision_loss)]
                Value::BigInt(v) => Some(Value::Double(v as f64)),
                Value::Text(ref s) if s.trim().is_empty() => Some(Value::Null),
                Value::Text(ref s) => s.trim().parse::<f64>().ok().map(Value::Double),
                _ => None,
            },
            SqlType::Char(_) | SqlType::VarChar(_) | SqlType::Text | SqlType::DateTime => {
                match value {
                    Value::Text(s) => Some(Value::Text(s)),
                    Value::BigInt(v) => Some(Value::Text(v.to_string())),
                    Value::Double(d) => Some(Value::Text(d.to_string())),
                    Value::Bool(b) => Some(Value::Text(if b { "1" } else { "0" }.to_string())),
                    _ => None,
                }
            }
            SqlType::Blob => match value {
                Value::Bytes(b) => Some(Value::Bytes(b)),
                Value::Text(s) => Some(Value::Bytes(s.into_bytes())),
                _ => None,
            },
            SqlType::Json => match value {
                Value::Json(j) => Some(Value::Json(j)),
                Value::Text(ref s) => serde_json::from_str(s).ok().map(Value::Json),
                other => Some(Value::Json(other.to_json())),
            },
        };

        let coerced = coerced.ok_or_else(|| {
            Error::invalid_input(format!(
                "field '{}' expects {}, got {}",
                field,
                self.sql_name(),
                value_kind(self)
            ))
        })?;

        if let (Some(max), Value::Text(s)) = (self.max_length(), &coerced) {
            let len = s.chars().count();
            if len > max as usize {
                return Err(Error::invalid_input(format!(
                    "field '{}' is limited to {} characters, got {}",
                    field, max, len
                )));
            }
        }

        Ok(coerced)
    }
}

fn value_kind(ty: &SqlType) -> &'static str {
    match ty {
        SqlType::Integer | SqlType::BigInt | SqlType::Double => "a non-numeric value",
        SqlType::Boolean => "a non-boolean value",
        SqlType::Json => "malformed JSON",
        _ => "an incompatible value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_from_form_text() {
        assert_eq!(
            SqlType::BigInt
                .coerce("age", Value::Text(" 42 ".to_string()))
                .unwrap(),
            Value::BigInt(42)
        );
        assert_eq!(
            SqlType::Integer
                .coerce("age", Value::Text(String::new()))
                .unwrap(),
            Value::Null
        );
        assert!(
            SqlType::Integer
                .coerce("age", Value::Text("forty".to_string()))
                .unwrap_err()
                .is_invalid_input()
        );
    }

    #[test]
    fn boolean_from_storage_integer() {
        assert_eq!(
            SqlType::Boolean.coerce("published", Value::BigInt(1)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            SqlType::Boolean
                .coerce("published", Value::Text("off".to_string()))
                .unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn varchar_enforces_length() {
        assert!(
            SqlType::VarChar(3)
                .coerce("code", Value::Text("abcd".to_string()))
                .is_err()
        );
        assert_eq!(
            SqlType::VarChar(3).coerce("code", Value::BigInt(12)).unwrap(),
            Value::Text("12".to_string())
        );
    }

    #[test]
    fn json_parses_stored_text() {
        let v = SqlType::Json
            .coerce("meta", Value::Text("{\"a\":1}".to_string()))
            .unwrap();
        assert_eq!(v, Value::Json(serde_json::json!({"a": 1})));
    }

    #[test]
    fn null_always_accepted() {
        assert_eq!(SqlType::Text.coerce("body", Value::Null).unwrap(), Value::Null);
    }
}
