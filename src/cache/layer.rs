//! Cache layer that orchestrates cached reads and invalidating writes.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::Result;
use crate::record::{Filters, Record, Value};
use crate::store::{Outcome, ResourceAccess, DEFAULT_ID_FIELD};

use super::key::QueryKey;
use super::traits::{CacheResult, EntryState};

/// A list result shared between the cache and every caller that reads it.
pub type Records = Arc<Vec<Record>>;

type SharedFetch = Shared<BoxFuture<'static, Result<Records>>>;

/// Per-call read options.
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
  /// Overrides the client's staleness window for this read
  pub stale_time: Option<Duration>,
  /// When false, never touch the store; serve whatever is cached
  pub enabled: bool,
}

impl Default for FetchOptions {
  fn default() -> Self {
    Self {
      stale_time: None,
      enabled: true,
    }
  }
}

impl FetchOptions {
  pub fn stale_time(stale_time: Duration) -> Self {
    Self {
      stale_time: Some(stale_time),
      ..Self::default()
    }
  }

  pub fn disabled() -> Self {
    Self {
      enabled: false,
      ..Self::default()
    }
  }
}

struct CachedRecords {
  records: Records,
  fetched: Instant,
  fetched_at: DateTime<Utc>,
}

struct InFlight {
  id: u64,
  fetch: SharedFetch,
}

struct Entry {
  /// Resource name as first requested; used for store reads
  resource: String,
  /// Case-folded resource name; used for invalidation
  group: String,
  data: Option<CachedRecords>,
  in_flight: Option<InFlight>,
}

impl Entry {
  fn is_expired(&self, now: Instant, gc_time: Duration) -> bool {
    self
      .data
      .as_ref()
      .is_some_and(|d| now.duration_since(d.fetched) >= gc_time)
  }
}

struct Cache {
  entries: HashMap<String, Entry>,
  swept: Instant,
}

impl Cache {
  fn new() -> Self {
    Self {
      entries: HashMap::new(),
      swept: Instant::now(),
    }
  }

  /// Drop expired data, then every entry left with neither data nor a
  /// fetch in flight. Returns how many entries were removed.
  fn sweep(&mut self, now: Instant, gc_time: Duration) -> usize {
    for entry in self.entries.values_mut() {
      if entry.is_expired(now, gc_time) {
        entry.data = None;
      }
    }

    let before = self.entries.len();
    self
      .entries
      .retain(|_, entry| entry.data.is_some() || entry.in_flight.is_some());
    self.swept = now;
    before - self.entries.len()
  }

  /// Sweep at most once per eviction window.
  fn sweep_if_due(&mut self, now: Instant, gc_time: Duration) {
    if now.duration_since(self.swept) >= gc_time {
      let removed = self.sweep(now, gc_time);
      if removed > 0 {
        debug!(removed, "evicted expired cache entries");
      }
    }
  }
}

type SharedCache = Arc<Mutex<Cache>>;

fn lock(cache: &Mutex<Cache>) -> MutexGuard<'_, Cache> {
  cache.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cached, coalescing front for a [`ResourceAccess`] implementation.
///
/// Reads are cached per (resource, filters). Writes go straight through and,
/// once they succeed, drop every cached read of the written resource.
/// Resource names are compared case-insensitively, as the store does.
///
/// Expired entries are swept out as the client is used, at most once per
/// eviction window.
pub struct ResourceClient<A> {
  access: Arc<A>,
  cache: SharedCache,
  next_fetch_id: Arc<AtomicU64>,
  /// How long before cached data is considered stale
  stale_time: Duration,
  /// How long cached data may be served at all
  gc_time: Duration,
}

impl<A: ResourceAccess + 'static> ResourceClient<A> {
  /// Create a new client over the given access implementation.
  pub fn new(access: A) -> Self {
    Self::from_shared(Arc::new(access))
  }

  pub fn from_shared(access: Arc<A>) -> Self {
    Self {
      access,
      cache: Arc::new(Mutex::new(Cache::new())),
      next_fetch_id: Arc::new(AtomicU64::new(0)),
      stale_time: Duration::from_secs(5 * 60),
      gc_time: Duration::from_secs(10 * 60),
    }
  }

  /// Set the default stale time for cached data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  /// Set how long cached data may be kept before it is evicted.
  pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
    self.gc_time = gc_time;
    self
  }

  /// The underlying access implementation, for uncached operations.
  pub fn access(&self) -> &A {
    &self.access
  }

  /// Number of entries currently held, loading ones included.
  pub fn len(&self) -> usize {
    lock(&self.cache).entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Read `resource` with cache-first semantics.
  ///
  /// 1. Fresh entry: return it without touching the store
  /// 2. Stale entry inside the eviction window: return it and refresh in
  ///    the background
  /// 3. Missing or evicted: fetch, joining any fetch already in flight for
  ///    the same key
  ///
  /// Returns `None` only when `options.enabled` is false and nothing is
  /// cached.
  pub async fn fetch_resource(
    &self,
    resource: &str,
    filters: &Filters,
    options: FetchOptions,
  ) -> Result<Option<CacheResult<Records>>> {
    let key = QueryKey::new(resource, filters);
    let hash = key.cache_hash();
    let stale_time = options.stale_time.unwrap_or(self.stale_time);

    let fetch = {
      let mut cache = lock(&self.cache);
      let now = Instant::now();
      cache.sweep_if_due(now, self.gc_time);

      if let Some(entry) = cache.entries.get_mut(&hash) {
        if entry.is_expired(now, self.gc_time) {
          debug!(resource, "evicting expired cache entry");
          entry.data = None;
        }

        if let Some(data) = &entry.data {
          let is_stale = now.duration_since(data.fetched) >= stale_time;
          let result =
            CacheResult::from_cache(Arc::clone(&data.records), data.fetched_at, is_stale);

          if is_stale && options.enabled && entry.in_flight.is_none() {
            debug!(key = key.canonical(), "serving stale entry, refreshing in background");
            let _refresh = self.start_fetch(entry, &hash, filters);
          }
          return Ok(Some(result));
        }
      }

      if !options.enabled {
        return Ok(None);
      }

      let entry = cache.entries.entry(hash.clone()).or_insert_with(|| Entry {
        resource: key.resource().to_string(),
        group: QueryKey::group(key.resource()),
        data: None,
        in_flight: None,
      });

      let joined = entry.in_flight.as_ref().map(|f| f.fetch.clone());
      match joined {
        Some(fetch) => {
          debug!(key = key.canonical(), "joining in-flight fetch");
          fetch
        }
        None => self.start_fetch(entry, &hash, filters),
      }
    };

    let records = fetch.await?;
    Ok(Some(CacheResult::from_network(records)))
  }

  /// Start a store read for `entry` and record it as in flight.
  ///
  /// The read is driven by its own task, so it settles even if every caller
  /// waiting on it goes away.
  fn start_fetch(&self, entry: &mut Entry, hash: &str, filters: &Filters) -> SharedFetch {
    let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
    let access = Arc::clone(&self.access);
    let cache = Arc::clone(&self.cache);
    let resource = entry.resource.clone();
    let hash = hash.to_string();
    let filters = filters.clone();

    let fetch = async move {
      debug!(resource = %resource, filters = filters.len(), "fetching");
      let result = access.list(&resource, &filters).await.map(Arc::new);
      settle(&cache, &hash, id, &result);
      result
    }
    .boxed()
    .shared();

    entry.in_flight = Some(InFlight {
      id,
      fetch: fetch.clone(),
    });
    tokio::spawn(fetch.clone());
    fetch
  }

  /// Insert a record, then invalidate the resource.
  pub async fn insert_record(&self, resource: &str, record: &Record) -> Result<Outcome> {
    let outcome = self.access.insert(resource, record).await?;
    self.invalidate(resource);
    Ok(outcome)
  }

  /// Update the record whose `id` field matches, then invalidate the resource.
  pub async fn update_record(
    &self,
    resource: &str,
    id: &Value,
    record: &Record,
  ) -> Result<Outcome> {
    self
      .update_record_by(resource, DEFAULT_ID_FIELD, id, record)
      .await
  }

  pub async fn update_record_by(
    &self,
    resource: &str,
    id_field: &str,
    id: &Value,
    record: &Record,
  ) -> Result<Outcome> {
    let outcome = self.access.update(resource, id, record, id_field).await?;
    self.invalidate(resource);
    Ok(outcome)
  }

  /// Delete the record whose `id` field matches, then invalidate the resource.
  pub async fn delete_record(&self, resource: &str, id: &Value) -> Result<Outcome> {
    self.delete_record_by(resource, DEFAULT_ID_FIELD, id).await
  }

  pub async fn delete_record_by(
    &self,
    resource: &str,
    id_field: &str,
    id: &Value,
  ) -> Result<Outcome> {
    let outcome = self.access.delete(resource, id, id_field).await?;
    self.invalidate(resource);
    Ok(outcome)
  }

  /// Drop every entry of `resource`, whatever its filters or spelling.
  ///
  /// Fetches already in flight still resolve for their callers, but their
  /// results are not cached.
  pub fn invalidate(&self, resource: &str) {
    let group = QueryKey::group(resource);
    let mut cache = lock(&self.cache);
    let before = cache.entries.len();
    cache.entries.retain(|_, entry| entry.group != group);
    debug!(resource, dropped = before - cache.entries.len(), "invalidated");
  }

  /// Drop every entry of every resource.
  pub fn invalidate_all(&self) {
    let mut cache = lock(&self.cache);
    debug!(dropped = cache.entries.len(), "invalidated all");
    cache.entries.clear();
  }

  /// Sweep now instead of waiting for the next read. Returns how many
  /// entries were removed.
  pub fn evict_expired(&self) -> usize {
    lock(&self.cache).sweep(Instant::now(), self.gc_time)
  }

  /// Where the entry for (resource, filters) is in its lifecycle, judged
  /// against the client's default windows.
  pub fn entry_state(&self, resource: &str, filters: &Filters) -> EntryState {
    let hash = QueryKey::new(resource, filters).cache_hash();
    let cache = lock(&self.cache);
    let Some(entry) = cache.entries.get(&hash) else {
      return EntryState::Absent;
    };

    let age = entry.data.as_ref().map(|d| d.fetched.elapsed());
    match (age, entry.in_flight.is_some()) {
      (Some(age), _) if age >= self.gc_time => EntryState::Absent,
      (Some(_), true) => EntryState::Refreshing,
      (Some(age), false) if age >= self.stale_time => EntryState::Stale,
      (Some(_), false) => EntryState::Fresh,
      (None, true) => EntryState::Loading,
      (None, false) => EntryState::Absent,
    }
  }

  /// Lightweight round trip to the store.
  pub async fn check_store_health(&self) -> bool {
    match self.access.health().await {
      Ok(()) => true,
      Err(e) => {
        debug!(error = %e, "store health check failed");
        false
      }
    }
  }
}

/// Record the result of fetch `id`, unless the entry was invalidated or
/// superseded while it ran.
fn settle(cache: &Mutex<Cache>, hash: &str, id: u64, result: &Result<Records>) {
  let mut cache = lock(cache);
  let Some(entry) = cache.entries.get_mut(hash) else {
    return;
  };
  if entry.in_flight.as_ref().map(|f| f.id) != Some(id) {
    return;
  }
  entry.in_flight = None;

  match result {
    Ok(records) => {
      entry.data = Some(CachedRecords {
        records: Arc::clone(records),
        fetched: Instant::now(),
        fetched_at: Utc::now(),
      });
    }
    Err(e) if entry.data.is_some() => {
      warn!(
        resource = %entry.resource,
        error = %e,
        "background refresh failed, keeping stale data"
      );
    }
    Err(_) => {
      cache.entries.remove(hash);
    }
  }
}

impl<A> Clone for ResourceClient<A> {
  fn clone(&self) -> Self {
    Self {
      access: Arc::clone(&self.access),
      cache: Arc::clone(&self.cache),
      next_fetch_id: Arc::clone(&self.next_fetch_id),
      stale_time: self.stale_time,
      gc_time: self.gc_time,
    }
  }
}
