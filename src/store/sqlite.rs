//! Embedded SQLite store.
//!
//! One explicitly owned connection per store. Whoever constructs the store
//! owns its lifecycle: `connect` once, share it behind an `Arc`, and call
//! `shutdown` when done.

use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::record::{Filters, Params, Record, Value};

use super::statement::{Statement, TableSchema};
use super::{ColumnInfo, Outcome, ResourceAccess};

type SharedConnection = Arc<Mutex<Option<Connection>>>;

/// SQLite-backed implementation of the resource access protocol.
pub struct SqliteStore {
  conn: SharedConnection,
  /// Cleared by `shutdown`; operations check it before touching the handle
  accepting: AtomicBool,
  database: String,
  keep_alive: Mutex<Option<JoinHandle<()>>>,
}

impl SqliteStore {
  /// Open the store described by `config`.
  ///
  /// Failure here is fatal for a process that serves the store; callers
  /// propagate it rather than retrying.
  pub async fn connect(config: &StoreConfig) -> Result<Self> {
    let path = Self::database_path(config)?;
    let timeout = config.timeout();

    let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
      let conn = match &path {
        Some(path) => {
          if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
              Error::connection(format!("Failed to create database directory: {}", e))
            })?;
          }
          Connection::open(path).map_err(|e| {
            Error::connection(format!(
              "Failed to open database at {}: {}",
              path.display(),
              e
            ))
          })?
        }
        None => Connection::open_in_memory()
          .map_err(|e| Error::connection(format!("Failed to open in-memory database: {}", e)))?,
      };
      Self::configure(&conn, timeout)?;
      Ok(conn)
    })
    .await??;

    let store = Self::from_connection(conn, config.database.clone());
    if config.keep_alive {
      store.start_keep_alive(config.keep_alive_interval());
    }

    info!(database = %config.database, "store connected");
    Ok(store)
  }

  /// Throwaway in-memory store with no keep-alive task.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| Error::connection(format!("Failed to open in-memory database: {}", e)))?;
    Self::configure(&conn, Duration::from_secs(5))?;
    Ok(Self::from_connection(conn, "memory".to_string()))
  }

  fn from_connection(conn: Connection, database: String) -> Self {
    Self {
      conn: Arc::new(Mutex::new(Some(conn))),
      accepting: AtomicBool::new(true),
      database,
      keep_alive: Mutex::new(None),
    }
  }

  fn configure(conn: &Connection, timeout: Duration) -> Result<()> {
    conn
      .busy_timeout(timeout)
      .map_err(|e| Error::connection(format!("Failed to set busy timeout: {}", e)))?;
    conn
      .execute_batch("PRAGMA foreign_keys = ON;")
      .map_err(|e| Error::connection(format!("Failed to enable foreign keys: {}", e)))?;
    Ok(())
  }

  /// Resolve the database file: explicit path, `:memory:`, or
  /// `<data dir>/estate-gate/<database>.db`.
  fn database_path(config: &StoreConfig) -> Result<Option<PathBuf>> {
    if let Some(path) = &config.path {
      if path.as_os_str() == ":memory:" {
        return Ok(None);
      }
      return Ok(Some(path.clone()));
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::connection("Could not determine data directory"))?;

    Ok(Some(
      data_dir
        .join("estate-gate")
        .join(format!("{}.db", config.database)),
    ))
  }

  /// Name of the resource set this store serves.
  pub fn database(&self) -> &str {
    &self.database
  }

  pub fn is_open(&self) -> bool {
    self.accepting.load(Ordering::Acquire)
  }

  /// Run a batch of statements with no parameters (schema setup, seeding).
  pub async fn execute_batch(&self, sql: &str) -> Result<()> {
    let sql = sql.to_string();
    self
      .with_conn(move |conn| conn.execute_batch(&sql).map_err(Error::from))
      .await
  }

  /// Stop accepting operations, let the in-flight one finish, then close.
  ///
  /// Operations issued after this point fail with a connection error.
  pub async fn shutdown(&self) -> Result<()> {
    if !self.accepting.swap(false, Ordering::AcqRel) {
      return Ok(());
    }

    if let Some(handle) = self
      .keep_alive
      .lock()
      .map_err(|_| Error::store("lock poisoned"))?
      .take()
    {
      handle.abort();
    }

    let conn = Arc::clone(&self.conn);
    tokio::task::spawn_blocking(move || -> Result<()> {
      // Waits for whichever operation currently holds the handle
      let mut guard = conn.lock().map_err(|_| Error::store("lock poisoned"))?;
      if let Some(conn) = guard.take() {
        conn.close().map_err(|(_, e)| Error::from(e))?;
      }
      Ok(())
    })
    .await??;

    info!(database = %self.database, "store closed");
    Ok(())
  }

  fn start_keep_alive(&self, every: Duration) {
    let conn = Arc::clone(&self.conn);
    let handle = tokio::spawn(async move {
      let mut interval = tokio::time::interval(every);
      // First tick completes immediately
      interval.tick().await;
      loop {
        interval.tick().await;
        let conn = Arc::clone(&conn);
        let alive = tokio::task::spawn_blocking(move || match conn.lock() {
          Ok(guard) => match guard.as_ref() {
            Some(conn) => conn
              .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
              .map(|_| true)
              .map_err(Error::from),
            None => Ok(false),
          },
          Err(_) => Err(Error::store("lock poisoned")),
        })
        .await;

        match alive {
          Ok(Ok(true)) => debug!("keep-alive ping"),
          Ok(Ok(false)) => break,
          Ok(Err(e)) => warn!(error = %e, "keep-alive ping failed"),
          Err(e) => warn!(error = %e, "keep-alive task failed"),
        }
      }
    });

    if let Ok(mut slot) = self.keep_alive.lock() {
      *slot = Some(handle);
    }
  }

  /// Run `f` against the connection on the blocking pool.
  async fn with_conn<T, F>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
  {
    if !self.is_open() {
      return Err(Error::connection("store is shut down"));
    }

    let conn = Arc::clone(&self.conn);
    tokio::task::spawn_blocking(move || {
      let mut guard = conn.lock().map_err(|_| Error::store("lock poisoned"))?;
      let conn = guard
        .as_mut()
        .ok_or_else(|| Error::connection("store is shut down"))?;
      f(conn)
    })
    .await?
  }
}

// ============================================================================
// Blocking helpers (run inside `with_conn`)
// ============================================================================

fn resource_names(conn: &Connection) -> Result<Vec<String>> {
  let mut stmt = conn.prepare(
    "SELECT name FROM sqlite_master
     WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
     ORDER BY name",
  )?;
  let names = stmt
    .query_map([], |row| row.get::<_, String>(0))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(names)
}

/// Look a resource up in the store's metadata. Unknown names never reach
/// identifier position.
fn table_schema(conn: &Connection, resource: &str) -> Result<TableSchema> {
  let name: Option<String> = conn
    .query_row(
      "SELECT name FROM sqlite_master
       WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name = ?1 COLLATE NOCASE",
      [resource],
      |row| row.get(0),
    )
    .optional()?;

  let name = name.ok_or_else(|| Error::validation(format!("unknown resource '{}'", resource)))?;

  let mut stmt =
    conn.prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid")?;
  let columns = stmt
    .query_map([&name], |row| {
      Ok(ColumnInfo {
        name: row.get(0)?,
        data_type: row.get(1)?,
        nullable: row.get::<_, i64>(2)? == 0,
        primary_key: row.get::<_, i64>(3)? > 0,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  Ok(TableSchema::new(name, columns))
}

fn read_record(row: &Row<'_>, names: &[String]) -> rusqlite::Result<Record> {
  let mut record = Record::with_capacity(names.len());
  for (i, name) in names.iter().enumerate() {
    record.insert(name.clone(), Value::from(row.get_ref(i)?));
  }
  Ok(record)
}

fn query_records(conn: &Connection, statement: &Statement) -> Result<Vec<Record>> {
  debug!(sql = %statement.sql, params = statement.values.len(), "query");
  let mut stmt = conn.prepare(&statement.sql)?;
  let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
  let records = stmt
    .query_map(params_from_iter(statement.values.iter()), |row| {
      read_record(row, &names)
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(records)
}

fn execute_statement(conn: &Connection, statement: &Statement) -> Result<u64> {
  debug!(sql = %statement.sql, params = statement.values.len(), "execute");
  let affected = conn.execute(&statement.sql, params_from_iter(statement.values.iter()))?;
  Ok(affected as u64)
}

fn execute_free_form(conn: &Connection, sql: &str, params: &Params) -> Result<Vec<Record>> {
  let bindings = params.bindings();
  debug!(params = bindings.len(), "free-form statement");

  let mut stmt = conn.prepare(sql)?;
  for (name, value) in &bindings {
    let index = stmt
      .parameter_index(name)?
      .ok_or_else(|| Error::validation(format!("statement has no parameter named {}", name)))?;
    stmt.raw_bind_parameter(index, value)?;
  }

  let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
  let mut rows = stmt.raw_query();
  let mut records = Vec::new();
  while let Some(row) = rows.next()? {
    records.push(read_record(row, &names)?);
  }
  Ok(records)
}

impl ResourceAccess for SqliteStore {
  async fn list(&self, resource: &str, filters: &Filters) -> Result<Vec<Record>> {
    let resource = resource.to_string();
    let filters = filters.clone();
    self
      .with_conn(move |conn| {
        let statement = table_schema(conn, &resource)?.select(&filters)?;
        query_records(conn, &statement)
      })
      .await
  }

  async fn insert(&self, resource: &str, record: &Record) -> Result<Outcome> {
    if record.is_empty() {
      return Err(Error::validation(format!(
        "cannot insert an empty record into {}",
        resource
      )));
    }

    let resource = resource.to_string();
    let record = record.clone();
    self
      .with_conn(move |conn| {
        let schema = table_schema(conn, &resource)?;
        let affected = execute_statement(conn, &schema.insert(&record)?)?;
        Ok(Outcome::inserted(schema.name(), affected))
      })
      .await
  }

  async fn update(
    &self,
    resource: &str,
    id: &Value,
    record: &Record,
    id_field: &str,
  ) -> Result<Outcome> {
    if record.is_empty() {
      return Err(Error::validation(format!(
        "cannot update {} with an empty record",
        resource
      )));
    }

    let resource = resource.to_string();
    let id = id.clone();
    let record = record.clone();
    let id_field = id_field.to_string();
    self
      .with_conn(move |conn| {
        let schema = table_schema(conn, &resource)?;
        let affected = execute_statement(conn, &schema.update(&id_field, &id, &record)?)?;
        Ok(Outcome::updated(schema.name(), affected))
      })
      .await
  }

  async fn delete(&self, resource: &str, id: &Value, id_field: &str) -> Result<Outcome> {
    let resource = resource.to_string();
    let id = id.clone();
    let id_field = id_field.to_string();
    self
      .with_conn(move |conn| {
        let statement = table_schema(conn, &resource)?.delete(&id_field, &id)?;
        let affected = execute_statement(conn, &statement)?;
        Ok(Outcome::deleted(affected))
      })
      .await
  }

  async fn count(&self, resource: &str) -> Result<u64> {
    let resource = resource.to_string();
    self
      .with_conn(move |conn| {
        let statement = table_schema(conn, &resource)?.count();
        let count: i64 = conn.query_row(&statement.sql, [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
      })
      .await
  }

  async fn execute(&self, statement: &str, params: &Params) -> Result<Vec<Record>> {
    if statement.trim().is_empty() {
      return Err(Error::validation("statement is empty"));
    }

    let statement = statement.to_string();
    let params = params.clone();
    self
      .with_conn(move |conn| execute_free_form(conn, &statement, &params))
      .await
  }

  async fn resources(&self) -> Result<Vec<String>> {
    self.with_conn(|conn| resource_names(conn)).await
  }

  async fn structure(&self, resource: &str) -> Result<Vec<ColumnInfo>> {
    let resource = resource.to_string();
    self
      .with_conn(move |conn| Ok(table_schema(conn, &resource)?.columns().to_vec()))
      .await
  }

  async fn health(&self) -> Result<()> {
    self
      .with_conn(|conn| {
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
      })
      .await
  }
}
