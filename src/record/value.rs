//! Scalar values carried by records, filters and statement parameters.

use chrono::{DateTime, Utc};
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A single field value.
///
/// The set is closed on purpose: records stay resource-agnostic, and every
/// variant has an unambiguous binding in the store and in JSON.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
  #[default]
  Null,
  Bool(bool),
  Integer(i64),
  Real(f64),
  Text(String),
  Date(DateTime<Utc>),
}

impl Value {
  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::Text(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      Value::Integer(i) => Some(*i),
      _ => None,
    }
  }

  pub fn as_f64(&self) -> Option<f64> {
    match self {
      Value::Integer(i) => Some(*i as f64),
      Value::Real(f) => Some(*f),
      _ => None,
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Null => Ok(()),
      Value::Bool(b) => write!(f, "{}", b),
      Value::Integer(i) => write!(f, "{}", i),
      Value::Real(r) => write!(f, "{}", r),
      Value::Text(s) => f.write_str(s),
      Value::Date(d) => f.write_str(&d.to_rfc3339()),
    }
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Value::Text(s.to_string())
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Value::Text(s)
  }
}

impl From<i64> for Value {
  fn from(i: i64) -> Self {
    Value::Integer(i)
  }
}

impl From<i32> for Value {
  fn from(i: i32) -> Self {
    Value::Integer(i64::from(i))
  }
}

impl From<f64> for Value {
  fn from(f: f64) -> Self {
    Value::Real(f)
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Value::Bool(b)
  }
}

impl From<DateTime<Utc>> for Value {
  fn from(d: DateTime<Utc>) -> Self {
    Value::Date(d)
  }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self {
    v.map(Into::into).unwrap_or(Value::Null)
  }
}

// ============================================================================
// JSON
// ============================================================================

impl Serialize for Value {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      Value::Null => serializer.serialize_unit(),
      Value::Bool(b) => serializer.serialize_bool(*b),
      Value::Integer(i) => serializer.serialize_i64(*i),
      Value::Real(f) => serializer.serialize_f64(*f),
      Value::Text(s) => serializer.serialize_str(s),
      Value::Date(d) => serializer.serialize_str(&d.to_rfc3339()),
    }
  }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
  type Value = Value;

  fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.write_str("a string, number, boolean or null")
  }

  fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
    Ok(Value::Null)
  }

  fn visit_none<E: de::Error>(self) -> Result<Value, E> {
    Ok(Value::Null)
  }

  fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
    deserializer.deserialize_any(self)
  }

  fn visit_bool<E: de::Error>(self, b: bool) -> Result<Value, E> {
    Ok(Value::Bool(b))
  }

  fn visit_i64<E: de::Error>(self, i: i64) -> Result<Value, E> {
    Ok(Value::Integer(i))
  }

  fn visit_u64<E: de::Error>(self, u: u64) -> Result<Value, E> {
    // Out-of-range unsigned values degrade to a real rather than wrapping
    Ok(i64::try_from(u).map(Value::Integer).unwrap_or(Value::Real(u as f64)))
  }

  fn visit_f64<E: de::Error>(self, f: f64) -> Result<Value, E> {
    Ok(Value::Real(f))
  }

  fn visit_str<E: de::Error>(self, s: &str) -> Result<Value, E> {
    Ok(Value::Text(s.to_string()))
  }

  fn visit_string<E: de::Error>(self, s: String) -> Result<Value, E> {
    Ok(Value::Text(s))
  }
}

impl<'de> Deserialize<'de> for Value {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    deserializer.deserialize_any(ValueVisitor)
  }
}

// ============================================================================
// Store binding
// ============================================================================

impl ToSql for Value {
  fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
    Ok(match self {
      Value::Null => ToSqlOutput::Owned(SqlValue::Null),
      Value::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
      Value::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
      Value::Real(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
      Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
      Value::Date(d) => ToSqlOutput::Owned(SqlValue::Text(d.to_rfc3339())),
    })
  }
}

impl From<ValueRef<'_>> for Value {
  fn from(v: ValueRef<'_>) -> Self {
    match v {
      ValueRef::Null => Value::Null,
      ValueRef::Integer(i) => Value::Integer(i),
      ValueRef::Real(f) => Value::Real(f),
      ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
      ValueRef::Blob(bytes) => Value::Text(hex::encode(bytes)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_json_scalars() {
    let values: Vec<Value> = serde_json::from_str(r#"[null, true, 42, 1.5, "Oak"]"#).unwrap();
    assert_eq!(
      values,
      vec![
        Value::Null,
        Value::Bool(true),
        Value::Integer(42),
        Value::Real(1.5),
        Value::Text("Oak".into()),
      ]
    );
  }

  #[test]
  fn test_json_rejects_nested() {
    assert!(serde_json::from_str::<Value>(r#"{"a": 1}"#).is_err());
    assert!(serde_json::from_str::<Value>("[1, 2]").is_err());
  }

  #[test]
  fn test_date_serializes_as_rfc3339() {
    let date = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let json = serde_json::to_string(&Value::Date(date)).unwrap();
    assert_eq!(json, "\"2024-03-01T12:00:00+00:00\"");
  }

  #[test]
  fn test_blob_reads_as_hex() {
    let v = Value::from(ValueRef::Blob(&[0xde, 0xad]));
    assert_eq!(v, Value::Text("dead".into()));
  }

  #[test]
  fn test_large_unsigned_becomes_real() {
    let v: Value = serde_json::from_str("18446744073709551615").unwrap();
    assert!(matches!(v, Value::Real(_)));
  }
}
