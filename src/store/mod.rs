//! Resource access protocol: uniform CRUD over named resources.
//!
//! Every operation is parameterized only by resource name, an optional
//! filter set and a record payload. Implementations never retry; every
//! failure goes back to the immediate caller.

mod remote;
mod sqlite;
mod statement;

pub use remote::RemoteStore;
pub use sqlite::SqliteStore;
pub use statement::{quote_ident, Statement, TableSchema};

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

use crate::error::Result;
use crate::record::{Filters, Params, Record, Value};

/// Field used to address a single record when the caller doesn't name one.
pub const DEFAULT_ID_FIELD: &str = "id";

/// Result of a write.
///
/// A delete that matched nothing reports `success: false`; an update always
/// reports success and leaves the "not found" check to `rows_affected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
  pub success: bool,
  pub message: String,
  #[serde(default)]
  pub rows_affected: u64,
}

impl Outcome {
  pub fn inserted(resource: &str, rows_affected: u64) -> Self {
    Self {
      success: true,
      message: format!("Record inserted into {}", resource),
      rows_affected,
    }
  }

  pub fn updated(resource: &str, rows_affected: u64) -> Self {
    Self {
      success: true,
      message: format!("Record updated in {}", resource),
      rows_affected,
    }
  }

  pub fn deleted(rows_affected: u64) -> Self {
    let success = rows_affected > 0;
    Self {
      success,
      message: if success {
        "Record deleted successfully".to_string()
      } else {
        "No record found".to_string()
      },
      rows_affected,
    }
  }

  /// Whether the write touched at least one row.
  pub fn matched(&self) -> bool {
    self.rows_affected > 0
  }
}

/// Column metadata for a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
  pub name: String,
  pub data_type: String,
  pub nullable: bool,
  pub primary_key: bool,
}

/// The resource access contract.
///
/// Implemented by the embedded [`SqliteStore`] and by [`RemoteStore`], which
/// speaks the same contract over HTTP.
pub trait ResourceAccess: Send + Sync {
  /// Every record of `resource` matching all `filters`. Order is unspecified.
  fn list(
    &self,
    resource: &str,
    filters: &Filters,
  ) -> impl Future<Output = Result<Vec<Record>>> + Send;

  /// Append one row. An empty record is rejected without a round trip.
  fn insert(&self, resource: &str, record: &Record) -> impl Future<Output = Result<Outcome>> + Send;

  /// Update the rows where `id_field = id`. Succeeds when nothing matches.
  fn update(
    &self,
    resource: &str,
    id: &Value,
    record: &Record,
    id_field: &str,
  ) -> impl Future<Output = Result<Outcome>> + Send;

  /// Delete the rows where `id_field = id`. Soft-fails when nothing matches.
  fn delete(
    &self,
    resource: &str,
    id: &Value,
    id_field: &str,
  ) -> impl Future<Output = Result<Outcome>> + Send;

  /// Total row count of `resource`.
  fn count(&self, resource: &str) -> impl Future<Output = Result<u64>> + Send;

  /// Run an arbitrary parameterized statement.
  fn execute(
    &self,
    statement: &str,
    params: &Params,
  ) -> impl Future<Output = Result<Vec<Record>>> + Send;

  /// Names of every resource the store exposes.
  fn resources(&self) -> impl Future<Output = Result<Vec<String>>> + Send;

  /// Column metadata for one resource.
  fn structure(&self, resource: &str) -> impl Future<Output = Result<Vec<ColumnInfo>>> + Send;

  /// Lightweight round trip.
  fn health(&self) -> impl Future<Output = Result<()>> + Send;
}

impl<T: ResourceAccess> ResourceAccess for Arc<T> {
  fn list(
    &self,
    resource: &str,
    filters: &Filters,
  ) -> impl Future<Output = Result<Vec<Record>>> + Send {
    (**self).list(resource, filters)
  }

  fn insert(
    &self,
    resource: &str,
    record: &Record,
  ) -> impl Future<Output = Result<Outcome>> + Send {
    (**self).insert(resource, record)
  }

  fn update(
    &self,
    resource: &str,
    id: &Value,
    record: &Record,
    id_field: &str,
  ) -> impl Future<Output = Result<Outcome>> + Send {
    (**self).update(resource, id, record, id_field)
  }

  fn delete(
    &self,
    resource: &str,
    id: &Value,
    id_field: &str,
  ) -> impl Future<Output = Result<Outcome>> + Send {
    (**self).delete(resource, id, id_field)
  }

  fn count(&self, resource: &str) -> impl Future<Output = Result<u64>> + Send {
    (**self).count(resource)
  }

  fn execute(
    &self,
    statement: &str,
    params: &Params,
  ) -> impl Future<Output = Result<Vec<Record>>> + Send {
    (**self).execute(statement, params)
  }

  fn resources(&self) -> impl Future<Output = Result<Vec<String>>> + Send {
    (**self).resources()
  }

  fn structure(&self, resource: &str) -> impl Future<Output = Result<Vec<ColumnInfo>>> + Send {
    (**self).structure(resource)
  }

  fn health(&self) -> impl Future<Output = Result<()>> + Send {
    (**self).health()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_delete_outcome_soft_fails() {
    let outcome = Outcome::deleted(0);
    assert!(!outcome.success);
    assert_eq!(outcome.message, "No record found");

    let outcome = Outcome::deleted(1);
    assert!(outcome.success);
    assert_eq!(outcome.message, "Record deleted successfully");
  }

  #[test]
  fn test_update_outcome_reports_zero_rows_as_success() {
    let outcome = Outcome::updated("Properties", 0);
    assert!(outcome.success);
    assert!(!outcome.matched());
  }
}
