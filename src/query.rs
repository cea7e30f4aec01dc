//! Async query abstraction for data fetching with caching support.
//!
//! Inspired by TanStack Query, this module provides a `Query<T>` type that
//! encapsulates async data fetching, loading states, and error handling, and
//! a [`ResourceQuery`] that drives one cached read of a [`ResourceClient`].
//!
//! # Example
//!
//! ```ignore
//! let mut properties = ResourceQuery::new(
//!     client.clone(),
//!     "Properties",
//!     Filters::new().with("status", "Available"),
//!     FetchOptions::default(),
//! );
//!
//! // Start fetching
//! properties.fetch();
//!
//! // In event loop tick
//! if properties.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! match properties.state() {
//!     QueryState::Loading => render_spinner(),
//!     QueryState::Success(result) => render_rows(&result.data),
//!     QueryState::Error(e) => render_error(e),
//!     QueryState::Idle => {}
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{CacheResult, CacheSource, FetchOptions, Records, ResourceClient};
use crate::error::{Error, Result};
use crate::record::Filters;
use crate::store::ResourceAccess;

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is currently fetching data
  Loading,
  /// Query completed successfully
  Success(T),
  /// Query failed with an error
  Error(Error),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&Error> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// Async query for data fetching with state management.
///
/// Query<T> encapsulates:
/// - The fetching logic (via a closure)
/// - Loading/success/error states
/// - Async result handling via channels
/// - An enabled flag that turns `fetch` into a no-op
pub struct Query<T> {
  state: QueryState<T>,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<Result<T>>>,
  enabled: bool,
}

impl<T: Send + 'static> Query<T> {
  /// Create a new query with the given fetcher function.
  ///
  /// The fetcher is called each time `fetch()` or `refetch()` starts a load.
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    Self {
      state: QueryState::Idle,
      fetcher: Box::new(move || Box::pin(fetcher())),
      receiver: None,
      enabled: true,
    }
  }

  pub fn with_enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  pub fn set_enabled(&mut self, enabled: bool) {
    self.enabled = enabled;
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled
  }

  /// Get the current state of the query.
  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  /// Get the data if the query succeeded.
  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  pub fn error(&self) -> Option<&Error> {
    self.state.error()
  }

  /// Start fetching data.
  ///
  /// This is a no-op if the query is already loading or is disabled.
  pub fn fetch(&mut self) {
    if !self.enabled || self.state.is_loading() {
      return;
    }
    self.start_fetch();
  }

  /// Force a refetch, even if already loading or data exists.
  pub fn refetch(&mut self) {
    if !self.enabled {
      return;
    }
    // Dropping the receiver abandons the pending result
    self.receiver = None;
    self.start_fetch();
  }

  /// Poll for results from a pending fetch.
  ///
  /// Returns `true` if the state changed (data arrived or error occurred).
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(Ok(data)) => {
        self.state = QueryState::Success(data);
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.state = QueryState::Error(error);
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.state = QueryState::Error(Error::store("Query was cancelled"));
        self.receiver = None;
        true
      }
    }
  }

  /// Wait for the pending fetch, if any, and apply its result.
  pub async fn settled(&mut self) -> bool {
    let Some(receiver) = &mut self.receiver else {
      return false;
    };
    self.state = match receiver.recv().await {
      Some(Ok(data)) => QueryState::Success(data),
      Some(Err(error)) => QueryState::Error(error),
      None => QueryState::Error(Error::store("Query was cancelled")),
    };
    self.receiver = None;
    true
  }

  fn start_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = QueryState::Loading;

    let future = (self.fetcher)();
    tokio::spawn(async move {
      let result = future.await;
      // Receiver may have been dropped by a refetch
      let _ = tx.send(result);
    });
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("enabled", &self.enabled)
      .finish_non_exhaustive()
  }
}

/// A query bound to one (resource, filters) read of a [`ResourceClient`].
pub struct ResourceQuery {
  resource: String,
  filters: Filters,
  query: Query<CacheResult<Records>>,
}

impl ResourceQuery {
  pub fn new<A: ResourceAccess + 'static>(
    client: ResourceClient<A>,
    resource: impl Into<String>,
    filters: Filters,
    options: FetchOptions,
  ) -> Self {
    let resource = resource.into();
    let enabled = options.enabled;
    let options = FetchOptions {
      enabled: true,
      ..options
    };

    let query = {
      let resource = resource.clone();
      let filters = filters.clone();
      Query::new(move || {
        let client = client.clone();
        let resource = resource.clone();
        let filters = filters.clone();
        async move {
          client
            .fetch_resource(&resource, &filters, options)
            .await?
            .ok_or_else(|| Error::store(format!("no data for {}", resource)))
        }
      })
      .with_enabled(enabled)
    };

    Self {
      resource,
      filters,
      query,
    }
  }

  pub fn resource(&self) -> &str {
    &self.resource
  }

  pub fn filters(&self) -> &Filters {
    &self.filters
  }

  pub fn state(&self) -> &QueryState<CacheResult<Records>> {
    self.query.state()
  }

  /// Rows of the last successful read.
  pub fn data(&self) -> Option<&Records> {
    self.query.data().map(|result| &result.data)
  }

  /// Where the last successful read was served from.
  pub fn source(&self) -> Option<CacheSource> {
    self.query.data().map(|result| result.source)
  }

  pub fn error(&self) -> Option<&Error> {
    self.query.error()
  }

  pub fn is_loading(&self) -> bool {
    self.query.is_loading()
  }

  pub fn set_enabled(&mut self, enabled: bool) {
    self.query.set_enabled(enabled);
  }

  pub fn fetch(&mut self) {
    self.query.fetch();
  }

  pub fn refetch(&mut self) {
    self.query.refetch();
  }

  pub fn poll(&mut self) -> bool {
    self.query.poll()
  }

  pub async fn settled(&mut self) -> bool {
    self.query.settled().await
  }
}

impl std::fmt::Debug for ResourceQuery {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ResourceQuery")
      .field("resource", &self.resource)
      .field("filters", &self.filters)
      .field("query", &self.query)
      .finish()
  }
}

/// Periodic store health check published on a watch channel.
///
/// The channel starts out `false` until the first check lands. The polling
/// task stops when the monitor is dropped.
pub struct HealthMonitor {
  status: watch::Receiver<bool>,
  task: JoinHandle<()>,
}

impl HealthMonitor {
  pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

  pub fn spawn<A: ResourceAccess + 'static>(client: ResourceClient<A>, every: Duration) -> Self {
    let (tx, status) = watch::channel(false);
    let task = tokio::spawn(async move {
      let mut interval = tokio::time::interval(every);
      loop {
        interval.tick().await;
        let connected = client.check_store_health().await;
        let changed = tx.send_if_modified(|current| {
          let changed = *current != connected;
          *current = connected;
          changed
        });
        if changed {
          info!(connected, "store health changed");
        } else {
          debug!(connected, "store health");
        }
        if tx.is_closed() {
          break;
        }
      }
    });

    Self { status, task }
  }

  /// Latest known status.
  pub fn is_connected(&self) -> bool {
    *self.status.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.status.clone()
  }
}

impl Drop for HealthMonitor {
  fn drop(&mut self) {
    self.task.abort();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::record::{Record, Value};
  use crate::store::SqliteStore;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  #[tokio::test]
  async fn test_query_success() {
    let mut query = Query::new(|| async { Ok(vec![1, 2, 3]) });

    assert!(matches!(query.state(), QueryState::Idle));

    query.fetch();
    assert!(query.is_loading());

    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert!(query.is_success());
    assert_eq!(query.data(), Some(&vec![1, 2, 3]));
  }

  #[tokio::test]
  async fn test_query_error() {
    let mut query: Query<i32> = Query::new(|| async { Err(Error::store("Something went wrong")) });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(query.poll());
    assert!(query.is_error());
    assert_eq!(query.error(), Some(&Error::store("Something went wrong")));
  }

  #[tokio::test]
  async fn test_fetch_while_loading_is_noop() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let mut query = Query::new(move || {
      counter.fetch_add(1, Ordering::SeqCst);
      async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(42)
      }
    });

    query.fetch();
    query.fetch();
    assert!(query.is_loading());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_disabled_query_does_not_fetch() {
    let mut query = Query::new(|| async { Ok(1) }).with_enabled(false);
    query.fetch();
    query.refetch();
    assert!(matches!(query.state(), QueryState::Idle));
    assert!(!query.poll());

    query.set_enabled(true);
    query.fetch();
    assert!(query.settled().await);
    assert_eq!(query.data(), Some(&1));
  }

  #[tokio::test]
  async fn test_refetch_cancels_pending() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let mut query = Query::new(move || {
      let counter = counter_clone.clone();
      async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(counter.fetch_add(1, Ordering::SeqCst))
      }
    });

    query.fetch();
    tokio::time::sleep(Duration::from_millis(10)).await;

    query.refetch();
    tokio::time::sleep(Duration::from_millis(100)).await;

    query.poll();
    // Only the second fetch is received
    assert_eq!(query.data(), Some(&1));
  }

  async fn seeded_client() -> ResourceClient<SqliteStore> {
    let store = SqliteStore::open_in_memory().unwrap();
    store
      .execute_batch(
        "CREATE TABLE Agents (id INTEGER PRIMARY KEY, name TEXT, region TEXT);
         INSERT INTO Agents (name, region) VALUES ('Mara', 'North'), ('Ravi', 'South');",
      )
      .await
      .unwrap();
    ResourceClient::new(store)
  }

  #[tokio::test]
  async fn test_resource_query_reads_through_cache() {
    let client = seeded_client().await;
    let filters = Filters::new().with("region", "North");

    let mut first =
      ResourceQuery::new(client.clone(), "Agents", filters.clone(), FetchOptions::default());
    first.fetch();
    assert!(first.settled().await);
    assert_eq!(first.source(), Some(CacheSource::Network));
    let rows = first.data().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&Value::from("Mara")));

    let mut second = ResourceQuery::new(client, "Agents", filters, FetchOptions::default());
    second.fetch();
    second.settled().await;
    assert_eq!(second.source(), Some(CacheSource::CacheFresh));
  }

  #[tokio::test]
  async fn test_resource_query_sees_writes_after_refetch() {
    let client = seeded_client().await;
    let mut query =
      ResourceQuery::new(client.clone(), "Agents", Filters::new(), FetchOptions::default());
    query.fetch();
    query.settled().await;
    assert_eq!(query.data().map(|rows| rows.len()), Some(2));

    let mut record = Record::new();
    record.insert("name".into(), "Noor".into());
    client.insert_record("Agents", &record).await.unwrap();

    query.refetch();
    query.settled().await;
    assert_eq!(query.source(), Some(CacheSource::Network));
    assert_eq!(query.data().map(|rows| rows.len()), Some(3));
  }

  #[tokio::test]
  async fn test_resource_query_surfaces_errors() {
    let client = seeded_client().await;
    let mut query = ResourceQuery::new(client, "Nope", Filters::new(), FetchOptions::default());
    query.fetch();
    query.settled().await;
    assert!(matches!(query.error(), Some(Error::Validation(_))));
  }

  #[tokio::test]
  async fn test_health_monitor_publishes_status() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let client = ResourceClient::from_shared(Arc::clone(&store));
    let monitor = HealthMonitor::spawn(client, Duration::from_millis(20));
    let mut status = monitor.subscribe();

    status.wait_for(|connected| *connected).await.unwrap();
    assert!(monitor.is_connected());

    store.shutdown().await.unwrap();
    status.wait_for(|connected| !*connected).await.unwrap();
    assert!(!monitor.is_connected());
  }
}
