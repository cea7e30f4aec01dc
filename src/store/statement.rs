//! Parameterized statement builder.
//!
//! Identifiers (table and column names) cannot be bound as parameters, so
//! they are resolved against the store's own metadata first and anything
//! not found there is rejected. Values are always bound, never interpolated.

use crate::error::{Error, Result};
use crate::record::{Filters, Record, Value};

use super::ColumnInfo;

/// SQL text plus the values bound to its numbered placeholders, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
  pub sql: String,
  pub values: Vec<Value>,
}

impl Statement {
  fn new(sql: String, values: Vec<Value>) -> Self {
    Self { sql, values }
  }
}

/// Quote an identifier for the store. Only ever called on allow-listed names.
pub fn quote_ident(name: &str) -> String {
  format!("\"{}\"", name.replace('"', "\"\""))
}

/// Allow-listed shape of one resource, as reported by the store.
#[derive(Debug, Clone)]
pub struct TableSchema {
  name: String,
  columns: Vec<ColumnInfo>,
}

impl TableSchema {
  pub fn new(name: impl Into<String>, columns: Vec<ColumnInfo>) -> Self {
    Self {
      name: name.into(),
      columns,
    }
  }

  /// Canonical resource name.
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn columns(&self) -> &[ColumnInfo] {
    &self.columns
  }

  /// Resolve a field name to its canonical column name.
  ///
  /// Matching is case-insensitive, as identifiers are in the store.
  pub fn column(&self, field: &str) -> Result<&str> {
    self
      .columns
      .iter()
      .find(|c| c.name.eq_ignore_ascii_case(field))
      .map(|c| c.name.as_str())
      .ok_or_else(|| Error::validation(format!("unknown field '{}' on {}", field, self.name)))
  }

  fn table(&self) -> String {
    quote_ident(&self.name)
  }

  pub fn select(&self, filters: &Filters) -> Result<Statement> {
    let mut sql = format!("SELECT * FROM {}", self.table());
    let mut values = Vec::with_capacity(filters.len());
    let mut conditions = Vec::with_capacity(filters.len());

    for (field, value) in filters.iter() {
      let column = quote_ident(self.column(field)?);
      if value.is_null() {
        conditions.push(format!("{} IS NULL", column));
      } else {
        values.push(value.clone());
        conditions.push(format!("{} = ?{}", column, values.len()));
      }
    }

    if !conditions.is_empty() {
      sql.push_str(" WHERE ");
      sql.push_str(&conditions.join(" AND "));
    }

    Ok(Statement::new(sql, values))
  }

  pub fn insert(&self, record: &Record) -> Result<Statement> {
    if record.is_empty() {
      return Err(Error::validation(format!(
        "cannot insert an empty record into {}",
        self.name
      )));
    }

    let mut columns = Vec::with_capacity(record.len());
    let mut placeholders = Vec::with_capacity(record.len());
    let mut values = Vec::with_capacity(record.len());

    for (i, (field, value)) in record.iter().enumerate() {
      columns.push(quote_ident(self.column(field)?));
      placeholders.push(format!("?{}", i + 1));
      values.push(value.clone());
    }

    let sql = format!(
      "INSERT INTO {} ({}) VALUES ({})",
      self.table(),
      columns.join(", "),
      placeholders.join(", ")
    );
    Ok(Statement::new(sql, values))
  }

  pub fn update(&self, id_field: &str, id: &Value, record: &Record) -> Result<Statement> {
    if record.is_empty() {
      return Err(Error::validation(format!(
        "cannot update {} with an empty record",
        self.name
      )));
    }

    let id_column = quote_ident(self.column(id_field)?);
    let mut assignments = Vec::with_capacity(record.len());
    let mut values = Vec::with_capacity(record.len() + 1);

    for (i, (field, value)) in record.iter().enumerate() {
      assignments.push(format!("{} = ?{}", quote_ident(self.column(field)?), i + 1));
      values.push(value.clone());
    }
    values.push(id.clone());

    let sql = format!(
      "UPDATE {} SET {} WHERE {} = ?{}",
      self.table(),
      assignments.join(", "),
      id_column,
      values.len()
    );
    Ok(Statement::new(sql, values))
  }

  pub fn delete(&self, id_field: &str, id: &Value) -> Result<Statement> {
    let id_column = quote_ident(self.column(id_field)?);
    let sql = format!("DELETE FROM {} WHERE {} = ?1", self.table(), id_column);
    Ok(Statement::new(sql, vec![id.clone()]))
  }

  pub fn count(&self) -> Statement {
    Statement::new(format!("SELECT COUNT(*) FROM {}", self.table()), Vec::new())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn properties() -> TableSchema {
    let col = |name: &str| ColumnInfo {
      name: name.to_string(),
      data_type: "TEXT".to_string(),
      nullable: true,
      primary_key: name == "property_id",
    };
    TableSchema::new(
      "Properties",
      vec![col("property_id"), col("address"), col("price"), col("status")],
    )
  }

  #[test]
  fn test_select_without_filters() {
    let stmt = properties().select(&Filters::new()).unwrap();
    assert_eq!(stmt.sql, "SELECT * FROM \"Properties\"");
    assert!(stmt.values.is_empty());
  }

  #[test]
  fn test_select_binds_every_filter() {
    let filters = Filters::new()
      .with("status", "Available")
      .with("address", "1'; DROP TABLE Properties; --");
    let stmt = properties().select(&filters).unwrap();
    assert_eq!(
      stmt.sql,
      "SELECT * FROM \"Properties\" WHERE \"address\" = ?1 AND \"status\" = ?2"
    );
    assert_eq!(stmt.values.len(), 2);
    assert!(!stmt.sql.contains("DROP"));
  }

  #[test]
  fn test_null_filter_uses_is_null() {
    let stmt = properties()
      .select(&Filters::new().with("status", Value::Null))
      .unwrap();
    assert!(stmt.sql.ends_with("WHERE \"status\" IS NULL"));
    assert!(stmt.values.is_empty());
  }

  #[test]
  fn test_unknown_field_is_rejected() {
    let err = properties()
      .select(&Filters::new().with("status = 1 OR 1", 1))
      .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
  }

  #[test]
  fn test_field_matching_is_case_insensitive() {
    let stmt = properties()
      .select(&Filters::new().with("STATUS", "Sold"))
      .unwrap();
    assert!(stmt.sql.contains("\"status\" = ?1"));
  }

  #[test]
  fn test_insert_rejects_empty_record() {
    let err = properties().insert(&Record::new()).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
  }

  #[test]
  fn test_update_binds_id_last() {
    let mut record = Record::new();
    record.insert("status".into(), "Sold".into());
    let stmt = properties()
      .update("property_id", &"P001".into(), &record)
      .unwrap();
    assert_eq!(
      stmt.sql,
      "UPDATE \"Properties\" SET \"status\" = ?1 WHERE \"property_id\" = ?2"
    );
    assert_eq!(stmt.values, vec![Value::from("Sold"), Value::from("P001")]);
  }

  #[test]
  fn test_quote_ident_escapes_quotes() {
    assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
  }
}
