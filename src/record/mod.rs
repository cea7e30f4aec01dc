//! Schema-agnostic record model.
//!
//! The same [`Record`] type is used for insert payloads, update payloads and
//! returned rows. Resource-specific shapes live outside this crate.

mod value;

pub use value::Value;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row: field name to scalar value, in column order.
pub type Record = IndexMap<String, Value>;

/// Equality filters, combined with AND. Empty means "all records".
///
/// Entries are kept sorted so structurally equal filter sets compare, hash
/// and serialize identically regardless of construction order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filters(BTreeMap<String, Value>);

impl Filters {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add an equality filter (builder style).
  pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
    self.0.insert(field.into(), value.into());
    self
  }

  pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
    self.0.insert(field.into(), value.into());
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v))
  }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Filters {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    Self(
      iter
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect(),
    )
  }
}

/// Parameters for a free-form statement.
///
/// A JSON array binds positionally as `@param0`, `@param1`, ...; a JSON
/// object binds by key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params {
  Positional(Vec<Value>),
  Named(IndexMap<String, Value>),
}

impl Default for Params {
  fn default() -> Self {
    Params::Positional(Vec::new())
  }
}

impl Params {
  pub fn is_empty(&self) -> bool {
    match self {
      Params::Positional(v) => v.is_empty(),
      Params::Named(m) => m.is_empty(),
    }
  }

  /// Parameter names as they appear in a statement, paired with their values.
  pub fn bindings(&self) -> Vec<(String, &Value)> {
    match self {
      Params::Positional(values) => values
        .iter()
        .enumerate()
        .map(|(i, v)| (format!("@param{}", i), v))
        .collect(),
      Params::Named(map) => map
        .iter()
        .map(|(k, v)| {
          let name = if k.starts_with(['@', ':', '$']) {
            k.clone()
          } else {
            format!("@{}", k)
          };
          (name, v)
        })
        .collect(),
    }
  }
}

impl From<Vec<Value>> for Params {
  fn from(values: Vec<Value>) -> Self {
    Params::Positional(values)
  }
}

impl From<IndexMap<String, Value>> for Params {
  fn from(map: IndexMap<String, Value>) -> Self {
    Params::Named(map)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_filters_ignore_insertion_order() {
    let a = Filters::new().with("status", "Available").with("city", "Austin");
    let b = Filters::new().with("city", "Austin").with("status", "Available");
    assert_eq!(a, b);
    assert_eq!(
      serde_json::to_string(&a).unwrap(),
      serde_json::to_string(&b).unwrap()
    );
  }

  #[test]
  fn test_positional_params_bind_as_param_n() {
    let params: Params = serde_json::from_str(r#"["x", 2]"#).unwrap();
    let names: Vec<String> = params.bindings().into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["@param0", "@param1"]);
  }

  #[test]
  fn test_named_params_bind_by_key() {
    let params: Params = serde_json::from_str(r#"{"a": "x", ":b": 1}"#).unwrap();
    let bindings = params.bindings();
    assert_eq!(bindings[0], ("@a".to_string(), &Value::Text("x".into())));
    assert_eq!(bindings[1], (":b".to_string(), &Value::Integer(1)));
  }

  #[test]
  fn test_record_keeps_field_order() {
    let record: Record = serde_json::from_str(r#"{"price": 1, "address": "a"}"#).unwrap();
    let keys: Vec<&str> = record.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["price", "address"]);
  }
}
